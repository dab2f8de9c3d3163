use thiserror::Error;

use crate::types::{FeatureLayout, Reading};

#[derive(Error, Debug, PartialEq)]
pub enum PayloadError {
    #[error("se esperaban al menos {expected} campos, llegaron {got}")]
    TooFewFields { expected: usize, got: usize },

    #[error("se esperaban exactamente {expected} columnas, llegaron {got}")]
    WrongWidth { expected: usize, got: usize },

    #[error("valor no numérico en {column}: '{value}'")]
    InvalidNumber { column: &'static str, value: String },

    #[error("valor no finito en {column}")]
    NonFinite { column: &'static str },
}

/// Decodifica el buffer de una notificación BLE.
/// Devuelve None para líneas vacías, cabeceras CSV ("meanX,...") o
/// mensajes de estado del firmware (">>> ...").
pub fn decode_notification(data: &[u8]) -> Option<String> {
    // Bytes inválidos se descartan, no se sustituyen
    let text: String = String::from_utf8_lossy(data)
        .chars()
        .filter(|c| *c != char::REPLACEMENT_CHARACTER)
        .collect();
    let text = text.trim();

    if text.is_empty() || text.starts_with("mean") || text.starts_with(">>>") {
        return None;
    }

    Some(text.to_string())
}

fn split_fields(text: &str) -> Vec<String> {
    text.replace(' ', "")
        .split(',')
        .filter(|p| !p.is_empty())
        .map(str::to_string)
        .collect()
}

/// Parsea una línea tolerante: basta con que estén las features,
/// label y studentId son opcionales.
pub fn parse_reading(text: &str, layout: FeatureLayout) -> Result<Reading, PayloadError> {
    let parts = split_fields(text);
    let n = layout.feature_count();

    if parts.len() < n {
        return Err(PayloadError::TooFewFields {
            expected: n,
            got: parts.len(),
        });
    }

    let mut features = Vec::with_capacity(n);
    for (column, value) in layout.feature_columns().iter().copied().zip(&parts) {
        let parsed: f32 = value.parse().map_err(|_| PayloadError::InvalidNumber {
            column,
            value: value.clone(),
        })?;
        if !parsed.is_finite() {
            return Err(PayloadError::NonFinite { column });
        }
        features.push(parsed);
    }

    Ok(Reading {
        features,
        label: parts.get(n).cloned(),
        student_id: parts.get(n + 1).cloned(),
        raw: text.trim().to_string(),
    })
}

/// Variante estricta para los colectores: la línea debe traer
/// exactamente features + label + studentId.
pub fn parse_record(text: &str, layout: FeatureLayout) -> Result<Reading, PayloadError> {
    let got = split_fields(text).len();
    if got != layout.record_width() {
        return Err(PayloadError::WrongWidth {
            expected: layout.record_width(),
            got,
        });
    }
    parse_reading(text, layout)
}

#[cfg(test)]
mod tests {
    use super::*;

    const IMU_LINE: &str =
        "0.12,0.30,1.1,-0.5,0.2,0.9,9.7,0.1,0.4,1.5,2.5,10.0,-3.0,1.0,6.0,0.0,0.5,2.0,right,n11611553";

    #[test]
    fn skips_headers_status_and_blank_lines() {
        assert_eq!(decode_notification(b""), None);
        assert_eq!(decode_notification(b"   \r\n"), None);
        assert_eq!(decode_notification(b"meanX,sdX,rangeX"), None);
        assert_eq!(decode_notification(b">>> armed"), None);
        assert_eq!(
            decode_notification(b" 1.0,2.0\n").as_deref(),
            Some("1.0,2.0")
        );
    }

    #[test]
    fn invalid_utf8_bytes_are_dropped() {
        let decoded = decode_notification(&[b'1', b',', 0xFF, b'2', b'.', 0xC3, b'5']).unwrap();
        assert_eq!(decoded, "1,2.5");
        assert_eq!(decode_notification(&[0xFF, 0xFE]), None);
    }

    #[test]
    fn parses_full_imu_line() {
        let reading = parse_reading(IMU_LINE, FeatureLayout::Imu).unwrap();
        assert_eq!(reading.features.len(), 18);
        assert_eq!(reading.features[0], 0.12);
        assert_eq!(reading.features[17], 2.0);
        assert_eq!(reading.label.as_deref(), Some("right"));
        assert_eq!(reading.student_id.as_deref(), Some("n11611553"));
    }

    #[test]
    fn spaces_and_empty_fields_are_ignored() {
        let line = "1, 2,,3,4,5,6,7,8,9,1 , up";
        let reading = parse_reading(line, FeatureLayout::Wrist).unwrap();
        assert_eq!(reading.features, vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0, 9.0, 1.0]);
        assert_eq!(reading.label.as_deref(), Some("up"));
        assert_eq!(reading.student_id, None);
    }

    #[test]
    fn too_few_fields_is_rejected() {
        let err = parse_reading("1,2,3", FeatureLayout::Imu).unwrap_err();
        assert_eq!(err, PayloadError::TooFewFields { expected: 18, got: 3 });
    }

    #[test]
    fn non_numeric_feature_names_its_column() {
        let err = parse_reading("1,2,x,4,5,6,7,8,9,0", FeatureLayout::Wrist).unwrap_err();
        assert_eq!(
            err,
            PayloadError::InvalidNumber {
                column: "rangeX",
                value: "x".to_string()
            }
        );
    }

    #[test]
    fn nan_is_rejected() {
        let err = parse_reading("1,2,3,4,NaN,6,7,8,9,0", FeatureLayout::Wrist).unwrap_err();
        assert_eq!(err, PayloadError::NonFinite { column: "sdY" });
    }

    #[test]
    fn strict_record_requires_exact_width() {
        assert!(parse_record(IMU_LINE, FeatureLayout::Imu).is_ok());
        let err = parse_record("1,2,3,4,5,6,7,8,9,0,up", FeatureLayout::Wrist).unwrap_err();
        assert_eq!(err, PayloadError::WrongWidth { expected: 12, got: 11 });
    }
}
