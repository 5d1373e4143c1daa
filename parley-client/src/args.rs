//! Command-line argument parsing

use clap::Parser;
use std::path::PathBuf;

use crate::config::Settings;

/// Get default settings path help text for current platform
fn default_config_help() -> String {
    #[cfg(target_os = "linux")]
    return "Settings file path (default: ~/.config/parley/config.json)".to_string();

    #[cfg(target_os = "macos")]
    return "Settings file path (default: ~/Library/Application Support/parley/config.json)"
        .to_string();

    #[cfg(target_os = "windows")]
    return "Settings file path (default: %APPDATA%\\parley\\config.json)".to_string();

    #[cfg(not(any(target_os = "linux", target_os = "macos", target_os = "windows")))]
    return "Settings file path (overrides platform default)".to_string();
}

/// Parley real-time voice client
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Settings file path (overrides platform default)
    #[arg(short, long, help = default_config_help())]
    pub config: Option<PathBuf>,

    /// API key (overrides settings and GEMINI_API_KEY)
    #[arg(long)]
    pub api_key: Option<String>,

    /// Agent model
    #[arg(short, long)]
    pub model: Option<String>,

    /// Prebuilt voice name
    #[arg(short, long)]
    pub voice: Option<String>,

    /// Input device name
    #[arg(long)]
    pub input_device: Option<String>,

    /// Output device name
    #[arg(long)]
    pub output_device: Option<String>,

    /// List audio devices and exit
    #[arg(long, default_value = "false")]
    pub list_devices: bool,

    /// Save the effective settings to the settings file and exit
    #[arg(long, default_value = "false")]
    pub save: bool,

    /// Enable debug logging
    #[arg(long, default_value = "false")]
    pub debug: bool,
}

impl Args {
    /// Apply command-line overrides on top of loaded settings
    pub fn apply(&self, settings: &mut Settings) {
        let overrides = [
            (&self.api_key, &mut settings.api_key),
            (&self.model, &mut settings.model),
            (&self.voice, &mut settings.voice),
            (&self.input_device, &mut settings.input_device),
            (&self.output_device, &mut settings.output_device),
        ];
        for (value, target) in overrides {
            if let Some(value) = value {
                *target = value.clone();
            }
        }
    }
}
