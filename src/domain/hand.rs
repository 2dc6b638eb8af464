//! Joint model for the prosthetic hand.
//!
//! The control vector sent to the hand actuator has one slot per joint, in
//! the order the firmware expects. The order and count here are a wire
//! contract with the peripheral and must not change without a firmware
//! update.

/// One controllable joint.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Joint {
    /// Stable short name, used by the console and the UI layer.
    pub name: &'static str,
    /// Maximum actuator target in degrees. Targets are clamped to
    /// `0.0..=max`.
    pub max: f32,
}

/// The controllable joints, in firmware frame order.
pub const HAND_JOINTS: &[Joint] = &[
    Joint { name: "pinky", max: 180.0 },
    Joint { name: "ring", max: 180.0 },
    Joint { name: "middle", max: 180.0 },
    Joint { name: "pointer", max: 180.0 },
    Joint { name: "thumb", max: 180.0 },
];

/// Look up a joint index by name.
pub fn joint_index(name: &str) -> Option<usize> {
    HAND_JOINTS.iter().position(|j| j.name == name)
}
