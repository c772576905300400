//! Scanline/stamp rasterizers for the primitive set. Geometry follows the
//! pygame conventions modes were written against: rects are (x, y, w, h),
//! arcs run counter-clockwise from 3 o'clock, stroke width extends inward.

use super::{Rgba, Surface};

impl Surface {
    pub fn hline(&mut self, x0: i32, x1: i32, y: i32, color: Rgba) {
        if y < 0 || y as u32 >= self.height() {
            return;
        }
        let (lo, hi) = if x0 <= x1 { (x0, x1) } else { (x1, x0) };
        let lo = lo.max(0);
        let hi = hi.min(self.width() as i32 - 1);
        for x in lo..=hi {
            self.plot(x, y, color);
        }
    }

    pub fn draw_circle(
        &mut self,
        cx: i32,
        cy: i32,
        radius: i32,
        color: Rgba,
        width: u32,
    ) {
        if radius <= 0 {
            self.plot(cx, cy, color);
            return;
        }

        if width == 0 {
            for dy in -radius..=radius {
                let half =
                    ((radius * radius - dy * dy) as f32).sqrt().round() as i32;
                self.hline(cx - half, cx + half, cy + dy, color);
            }
            return;
        }

        let outer = radius as i64 * radius as i64;
        let inner_r = (radius - width as i32).max(0) as i64;
        let inner = inner_r * inner_r;
        for dy in -radius..=radius {
            for dx in -radius..=radius {
                let d = dx as i64 * dx as i64 + dy as i64 * dy as i64;
                if d <= outer && d > inner {
                    self.plot(cx + dx, cy + dy, color);
                }
            }
        }
    }

    pub fn draw_rect(
        &mut self,
        x: i32,
        y: i32,
        w: i32,
        h: i32,
        color: Rgba,
        width: u32,
    ) {
        if w <= 0 || h <= 0 {
            return;
        }

        if width == 0 {
            for row in y..y + h {
                self.hline(x, x + w - 1, row, color);
            }
            return;
        }

        let t = (width as i32).min(w / 2 + 1).min(h / 2 + 1);
        for i in 0..t {
            // Concentric 1px outlines, like pygame's inward stroke.
            let (rx, ry, rw, rh) = (x + i, y + i, w - 2 * i, h - 2 * i);
            if rw <= 0 || rh <= 0 {
                break;
            }
            self.hline(rx, rx + rw - 1, ry, color);
            self.hline(rx, rx + rw - 1, ry + rh - 1, color);
            for row in ry..ry + rh {
                self.plot(rx, row, color);
                self.plot(rx + rw - 1, row, color);
            }
        }
    }

    pub fn draw_line(
        &mut self,
        x0: i32,
        y0: i32,
        x1: i32,
        y1: i32,
        color: Rgba,
        width: u32,
    ) {
        let thick = width.max(1);
        let radius = (thick as i32 - 1) / 2;

        // Bresenham; widths above 1 stamp a disc along the path.
        let dx = (x1 - x0).abs();
        let dy = -(y1 - y0).abs();
        let sx = if x0 < x1 { 1 } else { -1 };
        let sy = if y0 < y1 { 1 } else { -1 };
        let mut err = dx + dy;
        let (mut x, mut y) = (x0, y0);

        loop {
            if thick == 1 {
                self.plot(x, y, color);
            } else {
                self.draw_circle(x, y, radius.max(1), color, 0);
            }
            if x == x1 && y == y1 {
                break;
            }
            let e2 = 2 * err;
            if e2 >= dy {
                err += dy;
                x += sx;
            }
            if e2 <= dx {
                err += dx;
                y += sy;
            }
        }
    }

    /// Connected line segments through `points`, optionally closing the
    /// last point back to the first.
    pub fn draw_lines(
        &mut self,
        points: &[(i32, i32)],
        closed: bool,
        color: Rgba,
        width: u32,
    ) {
        if points.len() < 2 {
            return;
        }
        for pair in points.windows(2) {
            self.draw_line(
                pair[0].0, pair[0].1, pair[1].0, pair[1].1, color, width,
            );
        }
        if closed {
            let first = points[0];
            let last = points[points.len() - 1];
            self.draw_line(last.0, last.1, first.0, first.1, color, width);
        }
    }

    pub fn draw_polygon(
        &mut self,
        points: &[(i32, i32)],
        color: Rgba,
        width: u32,
    ) {
        if points.len() < 3 {
            self.draw_lines(points, false, color, width.max(1));
            return;
        }

        if width > 0 {
            self.draw_lines(points, true, color, width);
            return;
        }

        // Even-odd scanline fill, sampling row centers.
        let y_min = points.iter().map(|p| p.1).min().unwrap_or(0);
        let y_max = points.iter().map(|p| p.1).max().unwrap_or(0);

        let mut crossings: Vec<f32> = Vec::with_capacity(points.len());
        for y in y_min..=y_max {
            let scan = y as f32 + 0.5;
            crossings.clear();

            for i in 0..points.len() {
                let (x0, y0) = points[i];
                let (x1, y1) = points[(i + 1) % points.len()];
                let (fy0, fy1) = (y0 as f32, y1 as f32);
                if (fy0 <= scan && fy1 > scan) || (fy1 <= scan && fy0 > scan)
                {
                    let t = (scan - fy0) / (fy1 - fy0);
                    crossings.push(x0 as f32 + t * (x1 - x0) as f32);
                }
            }

            crossings.sort_by(|a, b| a.total_cmp(b));
            for pair in crossings.chunks_exact(2) {
                self.hline(
                    pair[0].round() as i32,
                    pair[1].round() as i32,
                    y,
                    color,
                );
            }
        }
    }

    pub fn draw_ellipse(
        &mut self,
        x: i32,
        y: i32,
        w: i32,
        h: i32,
        color: Rgba,
        width: u32,
    ) {
        if w <= 0 || h <= 0 {
            return;
        }
        let rx = w as f32 / 2.0;
        let ry = h as f32 / 2.0;
        let cx = x as f32 + rx;
        let cy = y as f32 + ry;

        let inside = |px: f32, py: f32, rx: f32, ry: f32| {
            if rx <= 0.0 || ry <= 0.0 {
                return false;
            }
            let nx = (px - cx) / rx;
            let ny = (py - cy) / ry;
            nx * nx + ny * ny <= 1.0
        };

        let (irx, iry) = if width == 0 {
            (0.0, 0.0)
        } else {
            ((rx - width as f32).max(0.0), (ry - width as f32).max(0.0))
        };

        for py in y..y + h {
            for px in x..x + w {
                let (fx, fy) = (px as f32 + 0.5, py as f32 + 0.5);
                if inside(fx, fy, rx, ry)
                    && (width == 0 || !inside(fx, fy, irx, iry))
                {
                    self.plot(px, py, color);
                }
            }
        }
    }

    pub fn draw_arc(
        &mut self,
        x: i32,
        y: i32,
        w: i32,
        h: i32,
        start_angle: f32,
        stop_angle: f32,
        color: Rgba,
        width: u32,
    ) {
        if w <= 0 || h <= 0 || stop_angle <= start_angle {
            return;
        }
        let rx = w as f32 / 2.0;
        let ry = h as f32 / 2.0;
        let cx = x as f32 + rx;
        let cy = y as f32 + ry;

        let steps = ((stop_angle - start_angle) * rx.max(ry))
            .ceil()
            .clamp(2.0, 4096.0) as u32;
        let dt = (stop_angle - start_angle) / steps as f32;

        let mut prev: Option<(i32, i32)> = None;
        for i in 0..=steps {
            let t = start_angle + dt * i as f32;
            // Screen y grows downward, so the arc sweeps visually CCW.
            let px = (cx + rx * t.cos()).round() as i32;
            let py = (cy - ry * t.sin()).round() as i32;
            if let Some((lx, ly)) = prev {
                if (lx, ly) != (px, py) {
                    self.draw_line(lx, ly, px, py, color, width.max(1));
                }
            }
            prev = Some((px, py));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lit_pixels(surface: &Surface) -> usize {
        surface
            .data()
            .chunks_exact(4)
            .filter(|px| px[0] > 0 || px[1] > 0 || px[2] > 0)
            .count()
    }

    #[test]
    fn filled_circle_covers_center_not_corners() {
        let mut surface = Surface::new(21, 21);
        surface.draw_circle(10, 10, 8, Rgba::rgb(255, 255, 255), 0);
        assert_eq!(surface.pixel(10, 10), Some(Rgba::rgb(255, 255, 255)));
        assert_eq!(surface.pixel(0, 0), Some(Rgba::BLACK));
    }

    #[test]
    fn outlined_circle_leaves_center_empty() {
        let mut surface = Surface::new(21, 21);
        surface.draw_circle(10, 10, 8, Rgba::rgb(255, 0, 0), 2);
        assert_eq!(surface.pixel(10, 10), Some(Rgba::BLACK));
        // A point on the ring is lit.
        assert_eq!(surface.pixel(18, 10), Some(Rgba::rgb(255, 0, 0)));
    }

    #[test]
    fn filled_rect_has_exact_area() {
        let mut surface = Surface::new(16, 16);
        surface.draw_rect(2, 3, 5, 4, Rgba::rgb(0, 255, 0), 0);
        assert_eq!(lit_pixels(&surface), 20);
        assert_eq!(surface.pixel(2, 3), Some(Rgba::rgb(0, 255, 0)));
        assert_eq!(surface.pixel(6, 6), Some(Rgba::rgb(0, 255, 0)));
        assert_eq!(surface.pixel(7, 3), Some(Rgba::BLACK));
    }

    #[test]
    fn outlined_rect_is_hollow() {
        let mut surface = Surface::new(16, 16);
        surface.draw_rect(1, 1, 10, 10, Rgba::rgb(0, 255, 0), 1);
        assert_eq!(surface.pixel(1, 1), Some(Rgba::rgb(0, 255, 0)));
        assert_eq!(surface.pixel(5, 5), Some(Rgba::BLACK));
    }

    #[test]
    fn line_connects_endpoints() {
        let mut surface = Surface::new(16, 16);
        surface.draw_line(0, 0, 15, 15, Rgba::rgb(255, 255, 255), 1);
        assert_eq!(surface.pixel(0, 0), Some(Rgba::rgb(255, 255, 255)));
        assert_eq!(surface.pixel(15, 15), Some(Rgba::rgb(255, 255, 255)));
        assert_eq!(surface.pixel(8, 8), Some(Rgba::rgb(255, 255, 255)));
    }

    #[test]
    fn filled_polygon_covers_interior() {
        let mut surface = Surface::new(20, 20);
        let square = [(2, 2), (17, 2), (17, 17), (2, 17)];
        surface.draw_polygon(&square, Rgba::rgb(255, 255, 0), 0);
        assert_eq!(surface.pixel(10, 10), Some(Rgba::rgb(255, 255, 0)));
        assert_eq!(surface.pixel(0, 0), Some(Rgba::BLACK));
    }

    #[test]
    fn polygon_outline_leaves_interior_empty() {
        let mut surface = Surface::new(20, 20);
        let square = [(2, 2), (17, 2), (17, 17), (2, 17)];
        surface.draw_polygon(&square, Rgba::rgb(255, 255, 0), 1);
        assert_eq!(surface.pixel(10, 10), Some(Rgba::BLACK));
        assert_eq!(surface.pixel(10, 2), Some(Rgba::rgb(255, 255, 0)));
    }

    #[test]
    fn ellipse_fills_bounding_center() {
        let mut surface = Surface::new(30, 20);
        surface.draw_ellipse(2, 2, 26, 16, Rgba::rgb(0, 0, 255), 0);
        assert_eq!(surface.pixel(15, 10), Some(Rgba::rgb(0, 0, 255)));
        assert_eq!(surface.pixel(2, 2), Some(Rgba::BLACK));
    }

    #[test]
    fn arc_quarter_stays_in_quadrant() {
        let mut surface = Surface::new(40, 40);
        // 0..pi/2 sweeps the upper-right quadrant (screen y down).
        surface.draw_arc(
            0,
            0,
            40,
            40,
            0.0,
            std::f32::consts::FRAC_PI_2,
            Rgba::rgb(255, 0, 255),
            1,
        );
        let lit_upper_right = (20..40)
            .flat_map(|x| (0..20).map(move |y| (x, y)))
            .filter(|&(x, y)| surface.pixel(x, y) != Some(Rgba::BLACK))
            .count();
        let lit_lower_left = (0..20)
            .flat_map(|x| (20..40).map(move |y| (x, y)))
            .filter(|&(x, y)| surface.pixel(x, y) != Some(Rgba::BLACK))
            .count();
        assert!(lit_upper_right > 0);
        assert_eq!(lit_lower_left, 0);
    }

    #[test]
    fn primitives_clip_rather_than_panic() {
        let mut surface = Surface::new(10, 10);
        surface.draw_circle(-5, -5, 8, Rgba::rgb(255, 255, 255), 0);
        surface.draw_rect(-3, -3, 100, 100, Rgba::rgb(255, 255, 255), 2);
        surface.draw_line(-20, 5, 30, 5, Rgba::rgb(255, 255, 255), 3);
        assert!(lit_pixels(&surface) > 0);
    }
}
