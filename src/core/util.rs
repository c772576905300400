use std::f32::consts::PI;

pub const TWO_PI: f32 = PI * 2.0;

/// `ternary!(cond, true_case, false_case)`
#[macro_export]
macro_rules! ternary {
    ($condition: expr, $_true: expr, $_false: expr) => {
        if $condition { $_true } else { $_false }
    };
}

/// Clamp a value into the unit interval.
pub fn unit(value: f32) -> f32 {
    value.clamp(0.0, 1.0)
}

/// Map a hue in degrees onto a fully-saturated RGB triple. Small HSV-wheel
/// helper shared by the color pickers exposed to mode scripts.
pub fn hue_to_rgb(hue_degrees: f32) -> [u8; 3] {
    let hue = hue_degrees.rem_euclid(360.0);
    let h = hue / 60.0;
    let c = 255.0;
    let x = c * (1.0 - ((h % 2.0) - 1.0).abs());

    let (r, g, b) = if h < 1.0 {
        (c, x, 0.0)
    } else if h < 2.0 {
        (x, c, 0.0)
    } else if h < 3.0 {
        (0.0, c, x)
    } else if h < 4.0 {
        (0.0, x, c)
    } else if h < 5.0 {
        (x, 0.0, c)
    } else {
        (c, 0.0, x)
    };

    [r as u8, g as u8, b as u8]
}
