pub mod chunk;
pub mod config;
pub mod decode;
pub mod emotion;
pub mod labels;
pub mod normalize;
pub mod pipeline;
pub mod timeline;
pub mod uploads;
pub mod util;
