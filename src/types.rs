use std::fmt;
use std::str::FromStr;

/// Servicio GATT anunciado por el sketch del Arduino
pub const SERVICE_UUID: &str = "19b10000-e8f2-537e-4f6c-d104768a1214";

/// Característica con notificaciones de features (una línea CSV por notificación)
pub const FEATURES_CHAR_UUID: &str = "19b10001-e8f2-537e-4f6c-d104768a1214";

/// Features del firmware de muñeca: acelerómetro (9) + wristArmed
pub const WRIST_FEATURE_COLUMNS: [&str; 10] = [
    "meanX", "sdX", "rangeX", "meanY", "sdY", "rangeY", "meanZ", "sdZ", "rangeZ", "wristArmed",
];

/// Features del firmware IMU: acelerómetro (9) + giroscopio (9)
pub const IMU_FEATURE_COLUMNS: [&str; 18] = [
    "meanAx", "sdAx", "rangeAx", "meanAy", "sdAy", "rangeAy", "meanAz", "sdAz", "rangeAz",
    "meanGx", "sdGx", "rangeGx", "meanGy", "sdGy", "rangeGy", "meanGz", "sdGz", "rangeGz",
];

/// Nombres antiguos de las columnas de acelerómetro, antes del prefijo "A"
pub const LEGACY_ACCEL_COLUMNS: [&str; 9] = [
    "meanX", "sdX", "rangeX", "meanY", "sdY", "rangeY", "meanZ", "sdZ", "rangeZ",
];

pub const LABEL_COLUMN: &str = "label";
pub const STUDENT_COLUMN: &str = "studentId";

/// Número de features de acelerómetro (siempre las 9 primeras columnas)
pub const NUM_ACCEL_FEATURES: usize = 9;

/// Umbrales de confianza para la salida por terminal
pub const HIGH_CONFIDENCE: f32 = 0.7;
pub const MEDIUM_CONFIDENCE: f32 = 0.5;

/// Cada cuántas predicciones se muestran features de ejemplo
pub const FEATURE_SAMPLE_EVERY: u64 = 10;

/// Formato de la línea CSV que envía el periférico
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FeatureLayout {
    /// 10 features + label + studentId (12 columnas)
    Wrist,
    /// 18 features + label + studentId (20 columnas)
    #[default]
    Imu,
}

impl FeatureLayout {
    pub fn feature_columns(&self) -> &'static [&'static str] {
        match self {
            FeatureLayout::Wrist => &WRIST_FEATURE_COLUMNS,
            FeatureLayout::Imu => &IMU_FEATURE_COLUMNS,
        }
    }

    pub fn feature_count(&self) -> usize {
        self.feature_columns().len()
    }

    /// Features + label + studentId
    pub fn record_width(&self) -> usize {
        self.feature_count() + 2
    }

    pub fn accel_columns(&self) -> &'static [&'static str] {
        &self.feature_columns()[..NUM_ACCEL_FEATURES]
    }

    pub fn csv_header(&self) -> Vec<&'static str> {
        let mut header = self.feature_columns().to_vec();
        header.push(LABEL_COLUMN);
        header.push(STUDENT_COLUMN);
        header
    }
}

impl fmt::Display for FeatureLayout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FeatureLayout::Wrist => write!(f, "wrist"),
            FeatureLayout::Imu => write!(f, "imu"),
        }
    }
}

impl FromStr for FeatureLayout {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "wrist" | "10" => Ok(FeatureLayout::Wrist),
            "imu" | "18" => Ok(FeatureLayout::Imu),
            other => Err(format!("layout desconocido '{}' (usar wrist o imu)", other)),
        }
    }
}

/// Una lectura ya validada del periférico
#[derive(Debug, Clone, PartialEq)]
pub struct Reading {
    pub features: Vec<f32>,
    /// Etiqueta que el firmware adjunta (la que el usuario está grabando)
    pub label: Option<String>,
    pub student_id: Option<String>,
    pub raw: String,
}

impl Reading {
    /// Los campos tal cual viajan en el CSV, sin reformatear los números
    pub fn fields(&self) -> Vec<String> {
        self.raw
            .replace(' ', "")
            .split(',')
            .filter(|p| !p.is_empty())
            .map(str::to_string)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layouts_have_expected_widths() {
        assert_eq!(FeatureLayout::Wrist.feature_count(), 10);
        assert_eq!(FeatureLayout::Wrist.record_width(), 12);
        assert_eq!(FeatureLayout::Imu.feature_count(), 18);
        assert_eq!(FeatureLayout::Imu.record_width(), 20);
    }

    #[test]
    fn header_ends_with_label_and_student() {
        let header = FeatureLayout::Imu.csv_header();
        assert_eq!(header.len(), 20);
        assert_eq!(header[18], "label");
        assert_eq!(header[19], "studentId");
        assert_eq!(FeatureLayout::Wrist.accel_columns()[8], "rangeZ");
    }

    #[test]
    fn layout_parses_from_cli_strings() {
        assert_eq!("IMU".parse::<FeatureLayout>(), Ok(FeatureLayout::Imu));
        assert_eq!("10".parse::<FeatureLayout>(), Ok(FeatureLayout::Wrist));
        assert!("quaternion".parse::<FeatureLayout>().is_err());
    }
}
