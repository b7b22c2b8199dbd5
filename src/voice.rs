//! The closed catalogue of narration voices.
//!
//! Each voice is one speaker from the CMU ARCTIC corpus. `xvector_index` is the
//! row of that speaker's utterance in the name-sorted `spkrec-xvect.zip`
//! archive (members are grouped by speaker: awb, bdl, clb, jmk, ksp, rms, slt).

use std::fmt;

use serde::{Deserialize, Serialize};

/// Typed voice identifier. Any `u32` is representable, but only ids present in
/// [`VOICES`] are synthesised; others resolve to [`VoiceId::DEFAULT`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VoiceId(pub u32);

impl VoiceId {
    pub const DEFAULT: VoiceId = VoiceId(0);
}

impl Default for VoiceId {
    fn default() -> Self {
        Self::DEFAULT
    }
}

impl fmt::Display for VoiceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u32> for VoiceId {
    fn from(id: u32) -> Self {
        VoiceId(id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Gender {
    Female,
    Male,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Accent {
    American,
    Scottish,
    Canadian,
    Indian,
}

#[derive(Debug, Clone, Serialize)]
pub struct VoiceProfile {
    pub id: VoiceId,
    pub name: &'static str,
    pub gender: Gender,
    pub accent: Accent,
    pub description: &'static str,
    #[serde(skip)]
    pub xvector_index: usize,
}

pub static VOICES: &[VoiceProfile] = &[
    VoiceProfile {
        id: VoiceId(0),
        name: "Sarah",
        gender: Gender::Female,
        accent: Accent::American,
        description: "Clear, even female narrator (ARCTIC slt)",
        xvector_index: 7306,
    },
    VoiceProfile {
        id: VoiceId(1),
        name: "Ben",
        gender: Gender::Male,
        accent: Accent::American,
        description: "Warm male narrator (ARCTIC bdl)",
        xvector_index: 1700,
    },
    VoiceProfile {
        id: VoiceId(2),
        name: "Claire",
        gender: Gender::Female,
        accent: Accent::American,
        description: "Bright, brisk female voice (ARCTIC clb)",
        xvector_index: 2850,
    },
    VoiceProfile {
        id: VoiceId(3),
        name: "Robert",
        gender: Gender::Male,
        accent: Accent::American,
        description: "Deep, measured male voice (ARCTIC rms)",
        xvector_index: 6200,
    },
    VoiceProfile {
        id: VoiceId(4),
        name: "Alasdair",
        gender: Gender::Male,
        accent: Accent::Scottish,
        description: "Scottish-accented male storyteller (ARCTIC awb)",
        xvector_index: 550,
    },
    VoiceProfile {
        id: VoiceId(5),
        name: "James",
        gender: Gender::Male,
        accent: Accent::Canadian,
        description: "Canadian male voice (ARCTIC jmk)",
        xvector_index: 3950,
    },
    VoiceProfile {
        id: VoiceId(6),
        name: "Kiran",
        gender: Gender::Male,
        accent: Accent::Indian,
        description: "Indian-accented male voice (ARCTIC ksp)",
        xvector_index: 5080,
    },
];

impl VoiceProfile {
    /// Every profile, default first.
    pub fn all() -> &'static [VoiceProfile] {
        VOICES
    }

    /// Exact lookup; `None` for ids outside the catalogue.
    pub fn find(id: VoiceId) -> Option<&'static VoiceProfile> {
        VOICES.iter().find(|v| v.id == id)
    }

    /// Lookup that resolves unknown ids to the default profile.
    pub fn lookup(id: VoiceId) -> &'static VoiceProfile {
        Self::find(id).unwrap_or(&VOICES[0])
    }

    /// Case-insensitive lookup by display name.
    pub fn by_name(name: &str) -> Option<&'static VoiceProfile> {
        VOICES.iter().find(|v| v.name.eq_ignore_ascii_case(name.trim()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_default_is_first() {
        assert_eq!(VOICES[0].id, VoiceId::DEFAULT);
    }

    #[test]
    fn test_ids_unique() {
        let ids: HashSet<_> = VOICES.iter().map(|v| v.id).collect();
        assert_eq!(ids.len(), VOICES.len());
    }

    #[test]
    fn test_unknown_resolves_to_default() {
        assert!(VoiceProfile::find(VoiceId(999_999)).is_none());
        assert_eq!(VoiceProfile::lookup(VoiceId(999_999)).id, VoiceId::DEFAULT);
        assert_eq!(VoiceProfile::lookup(VoiceId(4)).name, "Alasdair");
    }

    #[test]
    fn test_by_name() {
        assert_eq!(VoiceProfile::by_name(" ben ").map(|v| v.id), Some(VoiceId(1)));
        assert!(VoiceProfile::by_name("nobody").is_none());
    }

    #[test]
    fn test_serialises_transparent_id() {
        let json = serde_json::to_value(VoiceProfile::lookup(VoiceId(2))).unwrap();
        assert_eq!(json["id"], 2);
        assert_eq!(json["gender"], "female");
        assert!(json.get("xvector_index").is_none());
    }
}
