//! Device Registry
//!
//! Static table of the peripherals the app must be connected to. The
//! registry is built once at process start (from settings) and never
//! mutated; every other component resolves peripherals through it by
//! descriptor id.

use crate::domain::settings::Settings;
use anyhow::{bail, Context, Result};
use uuid::{uuid, Uuid};

/// Immutable description of one peripheral role.
#[derive(Debug, Clone)]
pub struct DeviceDescriptor {
    /// Stable short name, unique within the registry.
    pub id: String,
    /// Match rule against the advertised device name.
    pub name_prefix: String,
    /// GATT service the characteristics below live under.
    pub service_uuid: Uuid,
    /// Peripheral-to-app characteristic (the peripheral's "TX").
    pub notify_characteristic: Uuid,
    /// App-to-peripheral characteristic (the peripheral's "RX"); absent for
    /// telemetry-only boards.
    pub write_characteristic: Option<Uuid>,
    /// Whether this peripheral receives the periodic control frames.
    pub accepts_control_frames: bool,
}

/// The fixed set of peripherals to discover and connect.
#[derive(Debug, Clone)]
pub struct DeviceRegistry {
    descriptors: Vec<DeviceDescriptor>,
}

impl DeviceRegistry {
    pub fn new(descriptors: Vec<DeviceDescriptor>) -> Result<Self> {
        if descriptors.is_empty() {
            bail!("Device registry must not be empty");
        }
        for (i, descriptor) in descriptors.iter().enumerate() {
            if descriptors[..i].iter().any(|d| d.id == descriptor.id) {
                bail!("Duplicate descriptor id in registry: {}", descriptor.id);
            }
            if descriptor.accepts_control_frames && descriptor.write_characteristic.is_none() {
                bail!(
                    "Descriptor {} accepts control frames but has no write characteristic",
                    descriptor.id
                );
            }
        }
        Ok(Self { descriptors })
    }

    /// Build the registry from persisted settings.
    pub fn from_settings(settings: &Settings) -> Result<Self> {
        let parse = |label: &str, value: &str| -> Result<Uuid> {
            Uuid::parse_str(value).with_context(|| format!("Invalid {label} UUID: {value}"))
        };

        Self::new(vec![
            DeviceDescriptor {
                id: "hand".to_string(),
                name_prefix: settings.hand_name_prefix.clone(),
                service_uuid: parse("hand service", &settings.hand_service_uuid)?,
                notify_characteristic: parse("hand notify", &settings.hand_notify_char_uuid)?,
                write_characteristic: Some(parse("hand write", &settings.hand_write_char_uuid)?),
                accepts_control_frames: true,
            },
            DeviceDescriptor {
                id: "emg".to_string(),
                name_prefix: settings.emg_name_prefix.clone(),
                service_uuid: parse("EMG service", &settings.emg_service_uuid)?,
                notify_characteristic: parse("EMG notify", &settings.emg_notify_char_uuid)?,
                write_characteristic: None,
                accepts_control_frames: false,
            },
        ])
    }

    /// The built-in hand/EMG pairing, matching the default settings.
    pub fn default_hand() -> Self {
        Self::new(vec![
            DeviceDescriptor {
                id: "hand".to_string(),
                name_prefix: "ESP32".to_string(),
                // Nordic UART service on the ESP32 actuator board
                service_uuid: uuid!("6e400001-b5a3-f393-e0a9-e50e24dcca9e"),
                notify_characteristic: uuid!("6e400003-b5a3-f393-e0a9-e50e24dcca9e"),
                write_characteristic: Some(uuid!("6e400002-b5a3-f393-e0a9-e50e24dcca9e")),
                accepts_control_frames: true,
            },
            DeviceDescriptor {
                id: "emg".to_string(),
                name_prefix: "Nicla".to_string(),
                // 16-bit SIG ids 0x180C / 0x2A56 on the Bluetooth base UUID
                service_uuid: uuid!("0000180c-0000-1000-8000-00805f9b34fb"),
                notify_characteristic: uuid!("00002a56-0000-1000-8000-00805f9b34fb"),
                write_characteristic: None,
                accepts_control_frames: false,
            },
        ])
        .expect("built-in registry is valid")
    }

    pub fn iter(&self) -> impl Iterator<Item = &DeviceDescriptor> {
        self.descriptors.iter()
    }

    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }

    pub fn get(&self, id: &str) -> Option<&DeviceDescriptor> {
        self.descriptors.iter().find(|d| d.id == id)
    }

    /// The descriptor the sync loop writes control frames to.
    pub fn primary(&self) -> Option<&DeviceDescriptor> {
        self.descriptors.iter().find(|d| d.accepts_control_frames)
    }
}
