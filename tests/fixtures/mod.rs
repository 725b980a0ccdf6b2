//! Generated image fixtures for integration tests

use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
use std::io::Cursor;

/// A photo fixture with its source dimensions
#[derive(Debug, Clone)]
pub struct PhotoFixture {
    pub name: &'static str,
    pub width: u32,
    pub height: u32,
    pub description: &'static str,
}

pub const PHOTO_FIXTURES: &[PhotoFixture] = &[
    PhotoFixture {
        name: "stall_door.png",
        width: 1600,
        height: 1200,
        description: "Landscape phone photo, needs downscaling",
    },
    PhotoFixture {
        name: "hoof_closeup.png",
        width: 600,
        height: 900,
        description: "Portrait, already under the evidence limit on one side",
    },
    PhotoFixture {
        name: "feed_bucket.png",
        width: 320,
        height: 240,
        description: "Small image, must not be upscaled",
    },
];

/// Encode a gradient image of the fixture's size as PNG
pub fn render(fixture: &PhotoFixture) -> Vec<u8> {
    let img = RgbImage::from_fn(fixture.width, fixture.height, |x, y| {
        Rgb([(x % 251) as u8, (y % 241) as u8, ((x + y) % 239) as u8])
    });
    let mut out = Cursor::new(Vec::new());
    DynamicImage::ImageRgb8(img)
        .write_to(&mut out, ImageFormat::Png)
        .expect("Failed to encode fixture");
    out.into_inner()
}

/// Render every fixture
pub fn all_photos() -> Vec<Vec<u8>> {
    PHOTO_FIXTURES.iter().map(render).collect()
}
