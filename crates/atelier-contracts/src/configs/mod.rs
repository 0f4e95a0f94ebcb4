mod paint;
mod resolver;

pub use paint::{
    PaintConfig, Performance, DEFAULT_ASPECT_RATIO, DEFAULT_GUIDANCE_SCALE, DEFAULT_IMAGE_SIZE,
    DEFAULT_OUTPUT_DIR, RANDOM_SEED,
};
pub use resolver::{ConfigResolver, ConfigSource, DEFAULT_CONFIG_NAME};
