//! Toy identity and the Lovense model capability table.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Discovery record for a single toy.
///
/// `name` is the Bluetooth advertising name (Lovense toys advertise as
/// `LVS-...`), `toy_id` the stable transport address. `model_name` is empty
/// after discovery unless the cache recognized the toy; it must be set to a
/// key of [`LOVENSE_MODELS`] before connecting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToyInfo {
    pub name: String,
    pub toy_id: String,
    #[serde(default)]
    pub model_name: String,
}

impl ToyInfo {
    pub fn new(name: impl Into<String>, toy_id: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            toy_id: toy_id.into(),
            model_name: String::new(),
        }
    }
}

/// Command configuration for one toy model: a display name and protocol
/// keyword for the primary capability, optionally the same for a secondary
/// capability.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModelCommands {
    pub primary_name: &'static str,
    pub primary_command: &'static str,
    pub secondary_name: Option<&'static str>,
    pub secondary_command: Option<&'static str>,
}

impl ModelCommands {
    const fn single(primary_name: &'static str, primary_command: &'static str) -> Self {
        Self {
            primary_name,
            primary_command,
            secondary_name: None,
            secondary_command: None,
        }
    }

    const fn dual(
        primary_name: &'static str,
        primary_command: &'static str,
        secondary_name: &'static str,
        secondary_command: &'static str,
    ) -> Self {
        Self {
            primary_name,
            primary_command,
            secondary_name: Some(secondary_name),
            secondary_command: Some(secondary_command),
        }
    }
}

/// Highest level accepted by the public API; out-of-range input is clamped.
pub const MAX_LEVEL: i32 = 20;

/// The one keyword that takes 0-5 instead of 0-20. Callers still pass 0-20;
/// the session divides by 4 before sending.
pub const AIR_LEVEL_COMMAND: &str = "Air:Level";
pub const AIR_LEVEL_MAX: i32 = 5;

/// All supported Lovense models. Versions of the same model share one entry
/// (Lush 1/2/3 are all "Lush"). A few command keywords are unverified and
/// inferred from similar models.
pub static LOVENSE_MODELS: &[(&str, ModelCommands)] = &[
    ("Solace", ModelCommands::dual("Thrust", "Thrusting", "Depth", "Depth")),
    // Keyword set unverified, assumed to match Solace.
    ("SexMachine", ModelCommands::dual("Thrust", "Thrusting", "Depth", "Depth")),
    ("Lush", ModelCommands::single("Vibration", "Vibrate")),
    ("Ferri", ModelCommands::single("Vibration", "Vibrate")),
    ("Nora", ModelCommands::dual("Vibration", "Vibrate", "Rotation", "Rotate")),
    ("Osci", ModelCommands::dual("Vibration", "Vibrate", "Oscillation", "Oscillate")),
    ("Mission", ModelCommands::single("Vibration", "Vibrate")),
    // Secondary keyword unverified.
    ("Flexer", ModelCommands::dual("Vibration", "Vibrate", "Fingering", "Finger")),
    ("Gravity", ModelCommands::dual("Vibration", "Vibrate", "Thrust", "Thrusting")),
    ("Dolce", ModelCommands::single("Vibration", "Vibrate")),
    ("Vulse", ModelCommands::single("Vibration", "Vibrate")),
    // Keyword unverified.
    ("Tenera", ModelCommands::single("Sucking", "Suck")),
    // Three vibrators, no known way to drive them independently.
    ("Lapis", ModelCommands::single("Vibration", "Vibrate")),
    ("Ambi", ModelCommands::single("Vibration", "Vibrate")),
    ("Hyphy", ModelCommands::single("Vibration", "Vibrate")),
    ("Exomoon", ModelCommands::single("Vibration", "Vibrate")),
    ("Gush", ModelCommands::single("Vibration", "Vibrate")),
    ("Edge", ModelCommands::single("Vibration", "Vibrate")),
    ("Max", ModelCommands::dual("Vibration", "Vibrate", "Air", "Air:Level")),
    ("Diamo", ModelCommands::single("Vibration", "Vibrate")),
    ("Calor", ModelCommands::single("Vibration", "Vibrate")),
    ("Ridge", ModelCommands::dual("Vibration", "Vibrate", "Rotation", "Rotate")),
    ("Hush", ModelCommands::single("Vibration", "Vibrate")),
    ("Domi", ModelCommands::single("Vibration", "Vibrate")),
    ("Gemini", ModelCommands::single("Vibration", "Vibrate")),
];

/// Models that accept the rotation-direction-change command.
pub static ROTATION_MODELS: &[&str] = &["Nora", "Ridge"];

/// Look up the command configuration for a model name.
pub fn model_commands(model_name: &str) -> Option<&'static ModelCommands> {
    LOVENSE_MODELS
        .iter()
        .find(|(name, _)| *name == model_name)
        .map(|(_, commands)| commands)
}

/// Every valid model name, in catalog order.
pub fn model_names() -> Vec<&'static str> {
    LOVENSE_MODELS.iter().map(|(name, _)| *name).collect()
}

pub fn supports_rotation(model_name: &str) -> bool {
    ROTATION_MODELS.contains(&model_name)
}

/// Reject model names outside the capability table. The error names the
/// offending value, the device address and the full list of valid names so it
/// can be surfaced to a user as-is.
pub fn validate_model_name(model_name: &str, address: &str) -> Result<()> {
    if model_commands(model_name).is_some() {
        return Ok(());
    }
    Err(Error::Validation {
        model: model_name.to_string(),
        address: address.to_string(),
        valid: model_names(),
    })
}
