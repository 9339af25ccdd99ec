pub type Rgb = (u8, u8, u8);

/// Vacant / available stalls.
pub const EMPHASIS: Rgb = (0x22, 0xC5, 0x5E);
/// Matched stalls that are not open; also the category-mode fallback.
pub const NEUTRAL: Rgb = (0x9C, 0xA3, 0xAF);
/// Spaces with no stall record.
pub const PLACEHOLDER: Rgb = (0xE5, 0xE7, 0xEB);

const HOVER_LIGHTEN: f64 = 0.08;

/// Section prefix -> fill color for category mode.
pub const PREFIX_COLORS: &[(&str, Rgb)] = &[
    ("A", (0x60, 0xA5, 0xFA)),  // dry goods
    ("B", (0xF5, 0x9E, 0x0B)),  // bakery
    ("C", (0xEF, 0x44, 0x44)),  // cooked food
    ("D", (0xA7, 0x8B, 0xFA)),  // dry goods annex
    ("F", (0x38, 0xBD, 0xF8)),  // fish
    ("FV", (0x84, 0xCC, 0x16)), // fruits and vegetables
    ("G", (0xF4, 0x72, 0xB6)),  // general merchandise
    ("M", (0xDC, 0x26, 0x26)),  // meat
    ("P", (0xFB, 0x92, 0x3C)),  // poultry
    ("R", (0x2D, 0xD4, 0xBF)),  // rice and grains
];

/// Leading alphabetic run of a stall number, upper-cased (`"fv-12"` -> `"FV"`).
pub fn stall_prefix(stall_number: &str) -> String {
    stall_number
        .trim()
        .chars()
        .take_while(|c| c.is_alphabetic())
        .flat_map(char::to_uppercase)
        .collect()
}

pub fn prefix_color(prefix: &str) -> Option<Rgb> {
    PREFIX_COLORS
        .iter()
        .find(|(candidate, _)| *candidate == prefix)
        .map(|&(_, rgb)| rgb)
}

/// Format as `#rrggbb`.
pub fn hex_css((r, g, b): Rgb) -> String {
    format!("#{r:02x}{g:02x}{b:02x}")
}

/// Hover variant of a fill: same hue, a little lighter.
pub fn hover_color(rgb: Rgb) -> Rgb {
    let (h, s, l) = rgb_to_hsl(rgb.0, rgb.1, rgb.2);
    let lightened = if l >= 0.85 {
        (l - HOVER_LIGHTEN).max(0.0)
    } else {
        (l + HOVER_LIGHTEN).min(1.0)
    };
    hsl_to_rgb(h, s, lightened)
}

/// Convert RGB to HSL. Returns (h: 0..360, s: 0..1, l: 0..1).
pub fn rgb_to_hsl(r: u8, g: u8, b: u8) -> (f64, f64, f64) {
    let r = r as f64 / 255.0;
    let g = g as f64 / 255.0;
    let b = b as f64 / 255.0;

    let max = r.max(g).max(b);
    let min = r.min(g).min(b);
    let l = (max + min) / 2.0;

    if (max - min).abs() < f64::EPSILON {
        return (0.0, 0.0, l);
    }

    let d = max - min;
    let s = if l > 0.5 {
        d / (2.0 - max - min)
    } else {
        d / (max + min)
    };

    let h = if (max - r).abs() < f64::EPSILON {
        let mut h = (g - b) / d;
        if g < b {
            h += 6.0;
        }
        h
    } else if (max - g).abs() < f64::EPSILON {
        (b - r) / d + 2.0
    } else {
        (r - g) / d + 4.0
    };

    (h * 60.0, s, l)
}

/// Convert HSL to RGB.
pub fn hsl_to_rgb(h: f64, s: f64, l: f64) -> (u8, u8, u8) {
    if s.abs() < f64::EPSILON {
        let v = (l * 255.0).round() as u8;
        return (v, v, v);
    }

    let q = if l < 0.5 {
        l * (1.0 + s)
    } else {
        l + s - l * s
    };
    let p = 2.0 * l - q;
    let h = h / 360.0;

    let r = hue_to_rgb(p, q, h + 1.0 / 3.0);
    let g = hue_to_rgb(p, q, h);
    let b = hue_to_rgb(p, q, h - 1.0 / 3.0);

    (
        (r * 255.0).round() as u8,
        (g * 255.0).round() as u8,
        (b * 255.0).round() as u8,
    )
}

fn hue_to_rgb(p: f64, q: f64, mut t: f64) -> f64 {
    if t < 0.0 {
        t += 1.0;
    }
    if t > 1.0 {
        t -= 1.0;
    }
    if t < 1.0 / 6.0 {
        p + (q - p) * 6.0 * t
    } else if t < 1.0 / 2.0 {
        q
    } else if t < 2.0 / 3.0 {
        p + (q - p) * (2.0 / 3.0 - t) * 6.0
    } else {
        p
    }
}

#[cfg(test)]
mod tests {
    use super::{
        EMPHASIS, PLACEHOLDER, hex_css, hover_color, hsl_to_rgb, prefix_color, rgb_to_hsl,
        stall_prefix,
    };

    #[test]
    fn roundtrip_rgb_through_hsl_is_identity() {
        let samples = [
            (0, 0, 0),
            (255, 255, 255),
            (128, 128, 128),
            (37, 91, 201),
            (250, 180, 20),
        ];

        for (r, g, b) in samples {
            let (h, s, l) = rgb_to_hsl(r, g, b);
            assert_eq!(hsl_to_rgb(h, s, l), (r, g, b));
        }
    }

    #[test]
    fn stall_prefix_takes_leading_letters() {
        assert_eq!(stall_prefix("FV-12"), "FV");
        assert_eq!(stall_prefix("fv 12"), "FV");
        assert_eq!(stall_prefix("M3"), "M");
        assert_eq!(stall_prefix("  Z-3"), "Z");
        assert_eq!(stall_prefix("12-A"), "");
        assert_eq!(stall_prefix(""), "");
    }

    #[test]
    fn prefix_table_lookup() {
        assert!(prefix_color("FV").is_some());
        assert!(prefix_color("M").is_some());
        assert_eq!(prefix_color("Z"), None);
        assert_eq!(prefix_color(""), None);
    }

    #[test]
    fn hex_css_is_lowercase_rrggbb() {
        assert_eq!(hex_css(EMPHASIS), "#22c55e");
        assert_eq!(hex_css((0, 10, 255)), "#000aff");
    }

    #[test]
    fn hover_color_differs_from_base() {
        assert_ne!(hover_color(EMPHASIS), EMPHASIS);
        let (_, _, base_l) = rgb_to_hsl(EMPHASIS.0, EMPHASIS.1, EMPHASIS.2);
        let hover = hover_color(EMPHASIS);
        let (_, _, hover_l) = rgb_to_hsl(hover.0, hover.1, hover.2);
        assert!(hover_l > base_l);

        // Very light fills darken instead so the hover stays visible.
        let placeholder_hover = hover_color(PLACEHOLDER);
        assert_ne!(placeholder_hover, PLACEHOLDER);
        let (_, _, light_l) = rgb_to_hsl(placeholder_hover.0, placeholder_hover.1, placeholder_hover.2);
        let (_, _, placeholder_l) = rgb_to_hsl(PLACEHOLDER.0, PLACEHOLDER.1, PLACEHOLDER.2);
        assert!(light_l < placeholder_l);
    }
}
