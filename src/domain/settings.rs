use crate::domain::models::{
    AdvertiseLayout, DigitEncoding, IdentityError, PaymentIdentity, ScanFilter,
};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogSettings {
    #[serde(default = "default_level")]
    pub level: String, // "trace", "debug", "info", "warn", "error"
    #[serde(default = "default_true")]
    pub file_logging_enabled: bool,
    #[serde(default = "default_true")]
    pub console_logging_enabled: bool,
    #[serde(default = "default_log_dir")]
    pub log_dir: String,
    #[serde(default = "default_prefix")]
    pub file_name_prefix: String,
    #[serde(default = "default_true")]
    pub show_file_line: bool,
    #[serde(default = "default_false")]
    pub show_thread_ids: bool,
    #[serde(default = "default_true")]
    pub show_target: bool,
    #[serde(default = "default_true")]
    pub ansi_colors: bool,
    #[serde(default = "default_rotation")]
    pub rotation: String, // "daily", "hourly", "minutely", "never"
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            level: default_level(),
            file_logging_enabled: default_true(),
            console_logging_enabled: default_true(),
            log_dir: default_log_dir(),
            file_name_prefix: default_prefix(),
            show_file_line: default_true(),
            show_thread_ids: default_false(),
            show_target: default_true(),
            ansi_colors: default_true(),
            rotation: default_rotation(),
        }
    }
}

fn default_level() -> String {
    "info".to_string()
}
fn default_true() -> bool {
    true
}
fn default_false() -> bool {
    false
}
fn default_log_dir() -> String {
    "logs".to_string()
}
fn default_prefix() -> String {
    "paybeacon".to_string()
}
fn default_rotation() -> String {
    "daily".to_string()
}

/// Persisted application settings: the payment identity fields the user
/// last entered plus protocol and logging options.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default = "default_card_number")]
    pub card_number: String,
    #[serde(default = "default_phone_last4")]
    pub phone_last4: String,
    #[serde(default = "default_device_name")]
    pub device_name: String,
    #[serde(default)]
    pub encoding: DigitEncoding,
    #[serde(default)]
    pub layout: AdvertiseLayout,
    #[serde(default)]
    pub scan_filter: ScanFilter,

    // Logging Settings
    #[serde(default)]
    pub log_settings: LogSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            card_number: default_card_number(),
            phone_last4: default_phone_last4(),
            device_name: default_device_name(),
            encoding: DigitEncoding::default(),
            layout: AdvertiseLayout::default(),
            scan_filter: ScanFilter::default(),
            log_settings: LogSettings::default(),
        }
    }
}

// Test-bench defaults, same as the shipped device profile.
fn default_card_number() -> String {
    "1234567812345678".to_string()
}
fn default_phone_last4() -> String {
    "1234".to_string()
}
fn default_device_name() -> String {
    "mcandle".to_string()
}

pub struct SettingsService {
    settings: Settings,
    settings_path: PathBuf,
}

impl SettingsService {
    pub fn new() -> anyhow::Result<Self> {
        let settings_path = Self::get_settings_path()?;
        let settings = Self::load_from_file(&settings_path).unwrap_or_default();

        Ok(Self {
            settings,
            settings_path,
        })
    }

    fn get_settings_path() -> anyhow::Result<PathBuf> {
        let mut path = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not determine config directory"))?;
        path.push("PayBeacon");
        fs::create_dir_all(&path)?;
        path.push("settings.json");
        Ok(path)
    }

    fn load_from_file(path: &PathBuf) -> anyhow::Result<Settings> {
        let contents = fs::read_to_string(path)?;
        let settings = serde_json::from_str(&contents)?;
        Ok(settings)
    }

    pub fn save(&self) -> anyhow::Result<()> {
        let json = serde_json::to_string_pretty(&self.settings)?;
        fs::write(&self.settings_path, json)?;
        Ok(())
    }

    pub fn get(&self) -> &Settings {
        &self.settings
    }

    pub fn get_mut(&mut self) -> &mut Settings {
        &mut self.settings
    }

    /// Build the payment identity from the stored fields. Persisted values
    /// pass through the same validation as fresh user input.
    pub fn identity(&self) -> Result<PaymentIdentity, IdentityError> {
        PaymentIdentity::new(
            self.settings.card_number.clone(),
            self.settings.phone_last4.clone(),
            self.settings.device_name.clone(),
            self.settings.encoding,
            self.settings.layout,
        )
    }

    pub fn update_identity(
        &mut self,
        card_number: &str,
        phone_last4: &str,
    ) -> anyhow::Result<PaymentIdentity> {
        let identity = PaymentIdentity::new(
            card_number,
            phone_last4,
            self.settings.device_name.clone(),
            self.settings.encoding,
            self.settings.layout,
        )?;
        self.settings.card_number = card_number.to_string();
        self.settings.phone_last4 = phone_last4.to_string();
        self.save()?;
        Ok(identity)
    }
}
