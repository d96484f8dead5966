use regex::Regex;

use crate::domain::{CohortLabel, Dataset, ResourceRole, basename};
use crate::error::LabcasError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classification {
    pub role: ResourceRole,
    pub pair_key: Option<String>,
}

impl Classification {
    fn unrecognized() -> Self {
        Self {
            role: ResourceRole::Unrecognized,
            pair_key: None,
        }
    }
}

/// Filename convention deciding PROC/MASK roles and pairing keys.
///
/// The stem is split on `_`; the first token equal (ignoring case) to a marker
/// fixes the role and everything before it is the pairing key, so
/// `case2_PROC.dcm` and `case2_PROC_v2.dcm` share the key `case2`.
#[derive(Debug, Clone)]
pub struct NamingRules {
    proc_markers: Vec<String>,
    mask_markers: Vec<String>,
    extensions: Vec<String>,
}

impl Default for NamingRules {
    fn default() -> Self {
        Self {
            proc_markers: vec!["PROC".to_string()],
            mask_markers: vec!["MASK".to_string()],
            extensions: vec!["dcm".to_string()],
        }
    }
}

impl NamingRules {
    pub fn new(
        proc_markers: Vec<String>,
        mask_markers: Vec<String>,
        extensions: Vec<String>,
    ) -> Result<Self, LabcasError> {
        let normalize = |values: Vec<String>| -> Vec<String> {
            values
                .into_iter()
                .map(|value| value.trim().trim_start_matches('.').to_uppercase())
                .filter(|value| !value.is_empty())
                .collect()
        };
        let proc_markers = normalize(proc_markers);
        let mask_markers = normalize(mask_markers);
        if proc_markers.is_empty() || mask_markers.is_empty() {
            return Err(LabcasError::InvalidConfig(
                "naming rules need at least one PROC and one MASK marker".to_string(),
            ));
        }
        if let Some(shared) = proc_markers.iter().find(|m| mask_markers.contains(m)) {
            return Err(LabcasError::InvalidConfig(format!(
                "marker {shared} is used for both PROC and MASK"
            )));
        }
        if let Some(bad) = proc_markers.iter().chain(&mask_markers).find(|m| m.contains('_')) {
            return Err(LabcasError::InvalidConfig(format!(
                "marker {bad} must not contain '_'"
            )));
        }
        Ok(Self {
            proc_markers,
            mask_markers,
            extensions: normalize(extensions),
        })
    }

    pub fn classify(&self, filename: &str) -> Classification {
        let name = basename(filename);
        let (stem, ext) = match name.rsplit_once('.') {
            Some((stem, ext)) => (stem, Some(ext)),
            None => (name, None),
        };
        if !self.extensions.is_empty() {
            let allowed = ext
                .map(|ext| self.extensions.contains(&ext.to_uppercase()))
                .unwrap_or(false);
            if !allowed {
                return Classification::unrecognized();
            }
        }

        let tokens: Vec<&str> = stem.split('_').collect();
        for (pos, token) in tokens.iter().enumerate() {
            let upper = token.to_uppercase();
            let role = if self.proc_markers.contains(&upper) {
                ResourceRole::Proc
            } else if self.mask_markers.contains(&upper) {
                ResourceRole::Mask
            } else {
                continue;
            };
            let key = tokens[..pos].join("_");
            if key.is_empty() {
                return Classification::unrecognized();
            }
            return Classification {
                role,
                pair_key: Some(key),
            };
        }
        Classification::unrecognized()
    }
}

/// Case/control convention over dataset path segments.
#[derive(Debug, Clone)]
pub struct LabelRules {
    case: Vec<Regex>,
    control: Vec<Regex>,
}

pub fn default_case_patterns() -> Vec<String> {
    vec![r"(?i)^cases?$".to_string(), r"^C\d{3,4}$".to_string()]
}

pub fn default_control_patterns() -> Vec<String> {
    vec![r"(?i)^controls?$".to_string(), r"^N\d{3,4}$".to_string()]
}

impl Default for LabelRules {
    fn default() -> Self {
        Self::new(&default_case_patterns(), &default_control_patterns())
            .unwrap_or_else(|_| Self {
                case: Vec::new(),
                control: Vec::new(),
            })
    }
}

impl LabelRules {
    pub fn new(case: &[String], control: &[String]) -> Result<Self, LabcasError> {
        let compile = |patterns: &[String]| -> Result<Vec<Regex>, LabcasError> {
            patterns
                .iter()
                .map(|pattern| {
                    Regex::new(pattern).map_err(|err| {
                        LabcasError::InvalidConfig(format!("label pattern {pattern}: {err}"))
                    })
                })
                .collect()
        };
        Ok(Self {
            case: compile(case)?,
            control: compile(control)?,
        })
    }

    /// Scans the dataset id segments, then its ancestry names, from the leaf upward.
    pub fn label(&self, dataset: &Dataset) -> CohortLabel {
        let segments = dataset
            .id
            .split('/')
            .rev()
            .chain(dataset.path.iter().rev().map(String::as_str));
        for segment in segments {
            if self.case.iter().any(|re| re.is_match(segment)) {
                return CohortLabel::Case;
            }
            if self.control.iter().any(|re| re.is_match(segment)) {
                return CohortLabel::Control;
            }
        }
        CohortLabel::Unknown
    }
}
