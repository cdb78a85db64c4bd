use std::{fmt, io::Cursor, str::FromStr};

use bytes::Bytes;
use chrono::{DateTime, Utc};
use image::{ImageFormat, ImageReader};
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, NoneAsEmptyString};
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum ImageError {
    #[error("unsupported image format: only PNG and JPEG designs are accepted")]
    Unsupported,
    #[error("could not read image: {0}")]
    Decode(String),
}

/// An uploaded design export. Immutable for the duration of one conversion.
#[derive(Debug, Clone)]
pub struct DesignImage {
    pub bytes: Bytes,
    pub mime_type: &'static str,
    pub width: u32,
    pub height: u32,
}

impl DesignImage {
    /// Sniffs the format and reads the pixel dimensions from the header only.
    pub fn decode(bytes: impl Into<Bytes>) -> Result<Self, ImageError> {
        let bytes = bytes.into();
        let format = image::guess_format(&bytes).map_err(|_| ImageError::Unsupported)?;
        let mime_type = match format {
            ImageFormat::Png => "image/png",
            ImageFormat::Jpeg => "image/jpeg",
            _ => return Err(ImageError::Unsupported),
        };
        let (width, height) = ImageReader::with_format(Cursor::new(&bytes[..]), format)
            .into_dimensions()
            .map_err(|e| ImageError::Decode(e.to_string()))?;
        Ok(Self { bytes, mime_type, width, height })
    }

    pub fn info(&self) -> ImageInfo {
        ImageInfo {
            width: self.width,
            height: self.height,
            mime_type: self.mime_type.to_string(),
            size_bytes: self.bytes.len(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct ImageInfo {
    pub width: u32,
    pub height: u32,
    pub mime_type: String,
    pub size_bytes: usize,
}

// --- Customization choices ---

/// A closed set of UI choices. The "keep the design as is" choice has no prompt value.
pub trait Choice: Sized + Copy + 'static {
    const ALL: &'static [Self];
    fn label(self) -> &'static str;
    fn prompt_value(self) -> Option<&'static str>;
}

#[derive(Debug, Error)]
#[error("unknown {kind} choice: {value}")]
pub struct UnknownChoice {
    pub kind: &'static str,
    pub value: String,
}

/// Accepts either the display label ("Modern Dark") or its kebab-case form ("modern-dark").
fn parse_choice<C: Choice>(kind: &'static str, raw: &str) -> Result<C, UnknownChoice> {
    let wanted = raw.trim();
    C::ALL
        .iter()
        .copied()
        .find(|c| {
            let label = c.label();
            label.eq_ignore_ascii_case(wanted) || kebab(label) == wanted.to_ascii_lowercase()
        })
        .ok_or_else(|| UnknownChoice { kind, value: raw.to_string() })
}

fn kebab(label: &str) -> String {
    label
        .split(|c: char| !c.is_ascii_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(str::to_ascii_lowercase)
        .collect::<Vec<_>>()
        .join("-")
}

macro_rules! choice_enum {
    ($name:ident, $kind:literal, { $($variant:ident => ($label:literal, $value:expr)),+ $(,)? }) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq)]
        pub enum $name { $($variant),+ }

        impl Choice for $name {
            const ALL: &'static [Self] = &[$(Self::$variant),+];
            fn label(self) -> &'static str {
                match self { $(Self::$variant => $label),+ }
            }
            fn prompt_value(self) -> Option<&'static str> {
                match self { $(Self::$variant => $value),+ }
            }
        }

        impl FromStr for $name {
            type Err = UnknownChoice;
            fn from_str(s: &str) -> Result<Self, Self::Err> { parse_choice($kind, s) }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(self.label()) }
        }
    };
}

choice_enum!(ColorScheme, "color scheme", {
    Original => ("Original (from design)", None),
    ModernDark => ("Modern Dark", Some("Modern Dark")),
    LightMinimal => ("Light & Minimal", Some("Light & Minimal")),
    VibrantColorful => ("Vibrant & Colorful", Some("Vibrant & Colorful")),
    ProfessionalBlue => ("Professional Blue", Some("Professional Blue")),
    WarmEarthTones => ("Warm Earth Tones", Some("Warm Earth Tones")),
});

choice_enum!(FontSize, "font size", {
    Standard => ("Standard", None),
    Small => ("Small (Mobile-friendly)", Some("small")),
    Large => ("Large (Accessibility)", Some("large")),
    ExtraLarge => ("Extra Large", Some("extra")),
});

choice_enum!(Spacing, "spacing", {
    Normal => ("Normal", None),
    Compact => ("Compact", Some("compact")),
    Generous => ("Generous", Some("generous")),
    ExtraSpacious => ("Extra Spacious", Some("extra spacious")),
});

choice_enum!(ButtonStyle, "button style", {
    Original => ("Original", None),
    RoundedShadow => ("Rounded with Shadow", Some("rounded with shadow")),
    FlatModern => ("Flat Modern", Some("flat modern")),
    Gradient => ("Gradient", Some("gradient")),
    Outlined => ("Outlined", Some("outlined")),
});

/// Stylistic overrides for the synthesis prompt. `None`, the "original" choices,
/// `false` and empty text all mean "say nothing about it".
#[serde_as]
#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq, Eq)]
pub struct CustomizationRequest {
    #[serde_as(as = "NoneAsEmptyString")]
    #[serde(default)]
    pub color_scheme: Option<ColorScheme>,
    #[serde_as(as = "NoneAsEmptyString")]
    #[serde(default)]
    pub font_size: Option<FontSize>,
    #[serde_as(as = "NoneAsEmptyString")]
    #[serde(default)]
    pub spacing: Option<Spacing>,
    #[serde_as(as = "NoneAsEmptyString")]
    #[serde(default)]
    pub button_style: Option<ButtonStyle>,
    #[serde(default)]
    pub animations: bool,
    #[serde(default)]
    pub instructions: String,
}

impl CustomizationRequest {
    /// The free text, if any was entered. Whitespace counts as text.
    pub fn focus(&self) -> Option<&str> {
        if self.instructions.is_empty() { None } else { Some(&self.instructions) }
    }
}

#[derive(Debug, Serialize, Clone)]
pub struct ChoiceOptions {
    pub color_scheme: Vec<&'static str>,
    pub font_size: Vec<&'static str>,
    pub spacing: Vec<&'static str>,
    pub button_style: Vec<&'static str>,
}

impl ChoiceOptions {
    pub fn all() -> Self {
        fn labels<C: Choice>() -> Vec<&'static str> { C::ALL.iter().map(|c| c.label()).collect() }
        Self {
            color_scheme: labels::<ColorScheme>(),
            font_size: labels::<FontSize>(),
            spacing: labels::<Spacing>(),
            button_style: labels::<ButtonStyle>(),
        }
    }
}

// --- Stage results ---

/// Outcome of one call to the generation service. Exactly one variant exists per call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum StageResult<T> {
    Success { value: T },
    Failure { message: String },
}

impl<T> StageResult<T> {
    pub fn success(value: T) -> Self { Self::Success { value } }

    pub fn failure(message: impl Into<String>) -> Self { Self::Failure { message: message.into() } }

    pub fn value(&self) -> Option<&T> {
        match self { Self::Success { value } => Some(value), Self::Failure { .. } => None }
    }

    pub fn message(&self) -> Option<&str> {
        match self { Self::Failure { message } => Some(message), Self::Success { .. } => None }
    }
}

/// Analysis text describing the design.
pub type AnalysisResult = StageResult<String>;
/// The extracted HTML document.
pub type GenerationResult = StageResult<String>;

/// What one conversion produced. Synthesis only ever follows a successful analysis.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ConversionReport {
    AnalysisFailed { message: String },
    Analyzed { analysis: String, generation: GenerationResult },
}

impl ConversionReport {
    pub fn html(&self) -> Option<&str> {
        match self {
            Self::Analyzed { generation, .. } => generation.value().map(String::as_str),
            Self::AnalysisFailed { .. } => None,
        }
    }

    pub fn error(&self) -> Option<&str> {
        match self {
            Self::AnalysisFailed { message } => Some(message),
            Self::Analyzed { generation, .. } => generation.message(),
        }
    }
}

// --- Sessions ---

#[derive(Debug, Serialize, Clone)]
pub struct Session {
    pub id: Uuid,
    pub image: Option<ImageInfo>,
    pub analysis: Option<String>,
    #[serde(skip)]
    pub html: Option<String>,
    pub has_document: bool,
    pub last_error: Option<String>,
    pub in_flight: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Session {
    pub fn new() -> Self {
        Self {
            id: Uuid::new_v4(),
            image: None,
            analysis: None,
            html: None,
            has_document: false,
            last_error: None,
            in_flight: false,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    /// Successful stages replace what the session shows; failures leave the
    /// previous results in place and are reported through `last_error`.
    pub fn record(&mut self, image: ImageInfo, report: &ConversionReport) {
        self.image = Some(image);
        if let ConversionReport::Analyzed { analysis, .. } = report {
            self.analysis = Some(analysis.clone());
        }
        if let Some(html) = report.html() {
            self.html = Some(html.to_string());
            self.has_document = true;
        }
        self.last_error = report.error().map(str::to_string);
        self.updated_at = Utc::now();
    }
}

impl Default for Session {
    fn default() -> Self { Self::new() }
}

#[derive(Debug, Serialize, Clone)]
pub struct ConvertResponse {
    pub session_id: Uuid,
    pub image: ImageInfo,
    #[serde(flatten)]
    pub report: ConversionReport,
}
