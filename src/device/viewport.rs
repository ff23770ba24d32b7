//! Aspect-preserving placement of a source surface inside an encoder frame

/// Region of the destination frame the source is drawn into
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Viewport {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    /// Source → destination scale factor
    pub scalar: f32,
}

impl Viewport {
    /// Fit `src` into `dst`, centred, preserving aspect ratio.
    ///
    /// `scalar = min(dst_w / src_w, dst_h / src_h)`; the unused space is split
    /// evenly into letterbox (top/bottom) or pillarbox (left/right) bars.
    pub fn fit(src_width: u32, src_height: u32, dst_width: u32, dst_height: u32) -> Self {
        let (src_w, src_h) = (src_width.max(1) as f32, src_height.max(1) as f32);
        let (dst_w, dst_h) = (dst_width as f32, dst_height as f32);

        let scalar = (dst_w / src_w).min(dst_h / src_h);
        let width = src_w * scalar;
        let height = src_h * scalar;

        Self {
            x: ((dst_w - width) / 2.0).max(0.0),
            y: ((dst_h - height) / 2.0).max(0.0),
            width,
            height,
            scalar,
        }
    }

    /// Viewport covering a whole surface
    pub fn full(width: u32, height: u32) -> Self {
        Self {
            x: 0.0,
            y: 0.0,
            width: width as f32,
            height: height as f32,
            scalar: 1.0,
        }
    }

    /// The same region on a half-resolution chroma plane
    pub fn chroma(&self) -> Self {
        Self {
            x: self.x / 2.0,
            y: self.y / 2.0,
            width: self.width / 2.0,
            height: self.height / 2.0,
            scalar: self.scalar / 2.0,
        }
    }

    /// Integer pixel bounds `(x0, y0, x1, y1)`, clamped to `limit`
    pub fn pixel_bounds(&self, limit_width: u32, limit_height: u32) -> (u32, u32, u32, u32) {
        let clamp = |v: f32, max: u32| (v.round().max(0.0) as u32).min(max);
        (
            clamp(self.x, limit_width),
            clamp(self.y, limit_height),
            clamp(self.x + self.width, limit_width),
            clamp(self.y + self.height, limit_height),
        )
    }
}
