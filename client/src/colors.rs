use stallmap_shared::Rgb;

/// Format RGBA as a CSS color string.
pub fn rgba_css((r, g, b): Rgb, a: f64) -> String {
    format!("rgba({r},{g},{b},{a})")
}

#[cfg(test)]
mod tests {
    use super::rgba_css;

    #[test]
    fn rgba_css_formats_components() {
        assert_eq!(rgba_css((34, 197, 94), 0.85), "rgba(34,197,94,0.85)");
    }
}
