use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use qrcode::render::svg;
use qrcode::QrCode;

const QR_MIN_DIMENSION: u32 = 256;

/// Render a scan token as an SVG QR code wrapped in a data URI.
pub fn scan_token_data_uri(token: &str) -> Result<String, qrcode::types::QrError> {
    let code = QrCode::new(token.as_bytes())?;
    let svg = code
        .render::<svg::Color<'_>>()
        .min_dimensions(QR_MIN_DIMENSION, QR_MIN_DIMENSION)
        .dark_color(svg::Color("#000000"))
        .light_color(svg::Color("#ffffff"))
        .build();
    Ok(format!("data:image/svg+xml;base64,{}", BASE64.encode(svg)))
}
