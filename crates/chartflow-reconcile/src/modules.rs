//! Optional chart modules
//!
//! Modules are enabled by the presence of their option key in the chart
//! configuration and disabled by its absence (or an explicit `null`).

use chartflow_tree::Tree;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt::{self, Display, Formatter};
use std::str::FromStr;

/// Enumerated module discriminant
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum ModuleKind {
    /// Series legend
    Legend,
    /// Range navigator
    Navigator,
    /// Zoom controls
    Zoom,
    /// User annotations
    Annotations,
    /// Background fill or image
    Background,
}

impl ModuleKind {
    /// Every module, in reconciliation order
    pub const ALL: [ModuleKind; 5] = [
        Self::Legend,
        Self::Navigator,
        Self::Zoom,
        Self::Annotations,
        Self::Background,
    ];

    /// Configuration key holding the module's options
    #[inline]
    #[must_use]
    pub fn option_key(self) -> &'static str {
        match self {
            Self::Legend => "legend",
            Self::Navigator => "navigator",
            Self::Zoom => "zoom",
            Self::Annotations => "annotations",
            Self::Background => "background",
        }
    }

    /// True when the module consumes processed data
    #[inline]
    #[must_use]
    pub fn needs_data(self) -> bool {
        matches!(self, Self::Navigator)
    }
}

impl Display for ModuleKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.option_key())
    }
}

impl FromStr for ModuleKind {
    type Err = UnknownModule;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|m| m.option_key() == s)
            .ok_or_else(|| UnknownModule(s.to_string()))
    }
}

/// Unrecognized module name
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown module: {0}")]
pub struct UnknownModule(pub String);

/// Modules to add and remove
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ModulePlan {
    /// Newly enabled
    pub add: Vec<ModuleKind>,
    /// Newly disabled
    pub remove: Vec<ModuleKind>,
}

impl ModulePlan {
    /// True when nothing changes
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.add.is_empty() && self.remove.is_empty()
    }
}

/// Whether `options` enables `module`
#[must_use]
pub fn is_enabled(module: ModuleKind, options: &Tree) -> bool {
    options
        .get(module.option_key())
        .is_some_and(|v| !v.is_null() && !v.is_delete())
}

/// Compare the enabled set with what `options` asks for
#[must_use]
pub fn plan_modules(enabled: &BTreeSet<ModuleKind>, options: &Tree) -> ModulePlan {
    let mut plan = ModulePlan::default();
    for module in ModuleKind::ALL {
        match (enabled.contains(&module), is_enabled(module, options)) {
            (false, true) => plan.add.push(module),
            (true, false) => plan.remove.push(module),
            _ => {}
        }
    }
    plan
}
