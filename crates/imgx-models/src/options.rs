//! Processing method and method-specific option definitions.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::ModelError;

/// Transformation requested from the processing backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum ProcessingMethod {
    /// Increase resolution by a fixed multiplier
    Upscale,
    /// Extend the canvas to a target aspect ratio
    Uncrop,
    /// Produce a square image at a target resolution
    Square,
}

impl ProcessingMethod {
    pub const ALL: &'static [ProcessingMethod] = &[
        ProcessingMethod::Upscale,
        ProcessingMethod::Uncrop,
        ProcessingMethod::Square,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ProcessingMethod::Upscale => "upscale",
            ProcessingMethod::Uncrop => "uncrop",
            ProcessingMethod::Square => "square",
        }
    }
}

impl fmt::Display for ProcessingMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for ProcessingMethod {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "upscale" => Ok(ProcessingMethod::Upscale),
            "uncrop" => Ok(ProcessingMethod::Uncrop),
            "square" => Ok(ProcessingMethod::Square),
            other => Err(ModelError::invalid_option(format!("unknown method '{}'", other))),
        }
    }
}

/// Upscale multiplier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Default)]
pub enum UpscaleFactor {
    #[serde(rename = "x1")]
    X1,
    #[default]
    #[serde(rename = "x2")]
    X2,
    #[serde(rename = "x4")]
    X4,
}

impl UpscaleFactor {
    pub fn multiplier(&self) -> u8 {
        match self {
            UpscaleFactor::X1 => 1,
            UpscaleFactor::X2 => 2,
            UpscaleFactor::X4 => 4,
        }
    }
}

impl FromStr for UpscaleFactor {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().trim_start_matches('x') {
            "1" => Ok(UpscaleFactor::X1),
            "2" => Ok(UpscaleFactor::X2),
            "4" => Ok(UpscaleFactor::X4),
            _ => Err(ModelError::invalid_option(format!("unknown upscale factor '{}'", s))),
        }
    }
}

/// Target aspect ratio for uncrop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Default)]
pub enum AspectRatio {
    #[default]
    #[serde(rename = "1:1")]
    Square,
    #[serde(rename = "1:2")]
    Portrait,
    #[serde(rename = "2:1")]
    Landscape,
}

impl AspectRatio {
    pub fn as_str(&self) -> &'static str {
        match self {
            AspectRatio::Square => "1:1",
            AspectRatio::Portrait => "1:2",
            AspectRatio::Landscape => "2:1",
        }
    }
}

impl fmt::Display for AspectRatio {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for AspectRatio {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "1:1" => Ok(AspectRatio::Square),
            "1:2" => Ok(AspectRatio::Portrait),
            "2:1" => Ok(AspectRatio::Landscape),
            other => Err(ModelError::invalid_option(format!("unknown aspect ratio '{}'", other))),
        }
    }
}

/// Output edge length for the square method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Default)]
pub enum TargetResolution {
    #[default]
    #[serde(rename = "1024")]
    R1024,
    #[serde(rename = "1568")]
    R1568,
    #[serde(rename = "2048")]
    R2048,
}

impl TargetResolution {
    pub fn pixels(&self) -> u32 {
        match self {
            TargetResolution::R1024 => 1024,
            TargetResolution::R1568 => 1568,
            TargetResolution::R2048 => 2048,
        }
    }
}

impl FromStr for TargetResolution {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "1024" => Ok(TargetResolution::R1024),
            "1568" => Ok(TargetResolution::R1568),
            "2048" => Ok(TargetResolution::R2048),
            other => Err(ModelError::invalid_option(format!("unknown resolution '{}'", other))),
        }
    }
}

/// Options for a single item. Exactly one method is active; the
/// method-specific fields travel with the variant so switching method
/// cannot leave stale parameters behind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "method", rename_all = "snake_case")]
pub enum ProcessingOptions {
    Upscale {
        factor: UpscaleFactor,
    },
    #[serde(rename_all = "camelCase")]
    Uncrop {
        aspect_ratio: AspectRatio,
    },
    #[serde(rename_all = "camelCase")]
    Square {
        target_res: TargetResolution,
    },
}

impl ProcessingOptions {
    /// Default options for a method.
    pub fn defaults_for(method: ProcessingMethod) -> Self {
        match method {
            ProcessingMethod::Upscale => ProcessingOptions::Upscale {
                factor: UpscaleFactor::default(),
            },
            ProcessingMethod::Uncrop => ProcessingOptions::Uncrop {
                aspect_ratio: AspectRatio::default(),
            },
            ProcessingMethod::Square => ProcessingOptions::Square {
                target_res: TargetResolution::default(),
            },
        }
    }

    pub fn method(&self) -> ProcessingMethod {
        match self {
            ProcessingOptions::Upscale { .. } => ProcessingMethod::Upscale,
            ProcessingOptions::Uncrop { .. } => ProcessingMethod::Uncrop,
            ProcessingOptions::Square { .. } => ProcessingMethod::Square,
        }
    }

    /// Switch to `method`. Selecting the active method keeps its parameters;
    /// any other method starts from its defaults.
    pub fn with_method(self, method: ProcessingMethod) -> Self {
        if self.method() == method {
            self
        } else {
            Self::defaults_for(method)
        }
    }

    pub fn upscale_factor(&self) -> Option<UpscaleFactor> {
        match self {
            ProcessingOptions::Upscale { factor } => Some(*factor),
            _ => None,
        }
    }

    pub fn aspect_ratio(&self) -> Option<AspectRatio> {
        match self {
            ProcessingOptions::Uncrop { aspect_ratio } => Some(*aspect_ratio),
            _ => None,
        }
    }

    pub fn target_resolution(&self) -> Option<TargetResolution> {
        match self {
            ProcessingOptions::Square { target_res } => Some(*target_res),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_switching_method_discards_parameters() {
        let options = ProcessingOptions::Upscale {
            factor: UpscaleFactor::X4,
        };

        let uncrop = options.with_method(ProcessingMethod::Uncrop);
        assert_eq!(uncrop.aspect_ratio(), Some(AspectRatio::Square));
        assert_eq!(uncrop.upscale_factor(), None);

        let back = uncrop.with_method(ProcessingMethod::Upscale);
        assert_eq!(back.upscale_factor(), Some(UpscaleFactor::X2));
    }

    #[test]
    fn test_same_method_keeps_parameters() {
        let options = ProcessingOptions::Square {
            target_res: TargetResolution::R2048,
        };
        assert_eq!(options.with_method(ProcessingMethod::Square), options);
    }

    #[test]
    fn test_wire_format() {
        let options = ProcessingOptions::Uncrop {
            aspect_ratio: AspectRatio::Landscape,
        };
        let json = serde_json::to_value(options).unwrap();
        assert_eq!(json, serde_json::json!({"method": "uncrop", "aspectRatio": "2:1"}));

        let parsed: ProcessingOptions =
            serde_json::from_str(r#"{"method":"square","targetRes":"1568"}"#).unwrap();
        assert_eq!(parsed.target_resolution(), Some(TargetResolution::R1568));
    }

    #[test]
    fn test_parse_options() {
        assert_eq!("x4".parse::<UpscaleFactor>().unwrap(), UpscaleFactor::X4);
        assert_eq!("2".parse::<UpscaleFactor>().unwrap(), UpscaleFactor::X2);
        assert!("x3".parse::<UpscaleFactor>().is_err());
        assert_eq!("1:2".parse::<AspectRatio>().unwrap(), AspectRatio::Portrait);
        assert_eq!("Square".parse::<ProcessingMethod>().unwrap(), ProcessingMethod::Square);
        assert_eq!(TargetResolution::R1568.pixels(), 1568);
    }
}
