//! Compositor.
//! Places a rendered board onto a background at a random scale and offset.
//! The overlay is always square and always lies fully inside the background, so the
//! bounding box never needs clamping.

use std::fmt;

use image::imageops::{self, FilterType};
use image::{DynamicImage, Rgba, RgbaImage};
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::error::CompositeError;

/// Pixel box of the placed board, `x_max`/`y_max` exclusive.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x_min: u32,
    pub y_min: u32,
    pub x_max: u32,
    pub y_max: u32,
}

impl fmt::Display for BoundingBox {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{},{},{},{}", self.x_min, self.y_min, self.x_max, self.y_max)
    }
}

/// Top-left corner and edge length of the overlay on the background.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Placement {
    pub x: u32,
    pub y: u32,
    pub size: u32,
}

impl Placement {
    /// Draws the edge length from `[min/4, min - 1]`, then an offset that keeps the square inside.
    pub fn sample<R: Rng + ?Sized>(
        bg_width: u32,
        bg_height: u32,
        rng: &mut R,
    ) -> Result<Self, CompositeError> {
        let shortest = bg_width.min(bg_height);
        if shortest < 2 {
            return Err(CompositeError::BackgroundTooSmall {
                width: bg_width,
                height: bg_height,
            });
        }

        // min/4 is zero below 4px; a zero-size overlay would give an empty box.
        let min_size = (shortest / 4).max(1);
        let size = rng.random_range(min_size..=shortest - 1);
        let x = rng.random_range(0..=bg_width - size);
        let y = rng.random_range(0..=bg_height - size);
        Ok(Self { x, y, size })
    }

    pub fn bounding_box(&self) -> BoundingBox {
        BoundingBox {
            x_min: self.x,
            y_min: self.y,
            x_max: self.x + self.size,
            y_max: self.y + self.size,
        }
    }
}

/// Composites `board` onto `background` at a random placement.
pub fn composite<R: Rng + ?Sized>(
    mut background: RgbaImage,
    board: &DynamicImage,
    rng: &mut R,
) -> Result<(RgbaImage, BoundingBox), CompositeError> {
    if board.width() == 0 || board.height() == 0 {
        return Err(CompositeError::EmptyBoard);
    }
    let placement = Placement::sample(background.width(), background.height(), rng)?;
    let board = resize_board(&board.to_rgba8(), placement.size);
    let bbox = composite_at(&mut background, &board, placement);
    Ok((background, bbox))
}

/// Box-averages when shrinking; Catmull-Rom when the overlay is larger than the render.
pub fn resize_board(board: &RgbaImage, size: u32) -> RgbaImage {
    if board.width() == size && board.height() == size {
        return board.clone();
    }
    if size <= board.width() && size <= board.height() {
        imageops::thumbnail(board, size, size)
    } else {
        imageops::resize(board, size, size, FilterType::CatmullRom)
    }
}

/// Blends an already-resized board into `background` at `placement`.
pub fn composite_at(background: &mut RgbaImage, board: &RgbaImage, placement: Placement) -> BoundingBox {
    debug_assert_eq!(board.dimensions(), (placement.size, placement.size));
    debug_assert!(placement.x + placement.size <= background.width());
    debug_assert!(placement.y + placement.size <= background.height());

    for (bx, by, fg) in board.enumerate_pixels() {
        let dst = background.get_pixel_mut(placement.x + bx, placement.y + by);
        *dst = blend_pixel(*dst, *fg);
    }
    placement.bounding_box()
}

/// `a * fg + (1 - a) * bg` per color channel with `a` the foreground alpha in `[0, 1]`.
/// Output alpha follows source-over.
pub fn blend_pixel(bg: Rgba<u8>, fg: Rgba<u8>) -> Rgba<u8> {
    match fg[3] {
        255 => return fg,
        0 => return bg,
        _ => {}
    }

    let a = f32::from(fg[3]) / 255.0;
    let mix = |f: u8, b: u8| (a * f32::from(f) + (1.0 - a) * f32::from(b)).round() as u8;
    let alpha = (f32::from(fg[3]) + (1.0 - a) * f32::from(bg[3])).round().min(255.0) as u8;
    Rgba([mix(fg[0], bg[0]), mix(fg[1], bg[1]), mix(fg[2], bg[2]), alpha])
}
