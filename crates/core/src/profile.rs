//! Psychographic user profile and the closed set of addressable profile fields.
//!
//! Rule conditions address the profile with dotted paths such as
//! `personality_traits.openness`. Paths are parsed once into [`ProfileField`]
//! and resolved through typed accessors; a path outside the enumeration is a
//! configuration error, and a known field without a value resolves to `None`.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::EngageError;

/// Pre-computed profile snapshot supplied by the inference subsystem.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct UserProfile {
    pub user_id: String,
    #[serde(default)]
    pub personality_traits: PersonalityTraits,
    #[serde(default)]
    pub emotional_state: EmotionalState,
    #[serde(default)]
    pub risk_profile: Option<String>,
    #[serde(default)]
    pub communication_style: Option<String>,
    #[serde(default)]
    pub engagement_score: Option<f64>,
    #[serde(default)]
    pub interests: Vec<String>,
    #[serde(default)]
    pub motivations: Vec<String>,
    #[serde(default)]
    pub segments: Vec<String>,
}

/// Big-five scores, each in `[0, 1]` when present.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct PersonalityTraits {
    pub openness: Option<f64>,
    pub conscientiousness: Option<f64>,
    pub extraversion: Option<f64>,
    pub agreeableness: Option<f64>,
    pub neuroticism: Option<f64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct EmotionalState {
    pub mood: Option<String>,
    pub stress_level: Option<f64>,
    pub energy_level: Option<f64>,
}

/// Every profile path a condition may reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProfileField {
    Openness,
    Conscientiousness,
    Extraversion,
    Agreeableness,
    Neuroticism,
    Mood,
    StressLevel,
    EnergyLevel,
    RiskProfile,
    CommunicationStyle,
    EngagementScore,
    Interests,
    Motivations,
    Segments,
}

/// A resolved profile value, borrowed from the profile.
#[derive(Debug, Clone, PartialEq)]
pub enum ProfileValue<'a> {
    Number(f64),
    Text(&'a str),
    List(&'a [String]),
}

impl ProfileField {
    pub const ALL: [ProfileField; 14] = [
        ProfileField::Openness,
        ProfileField::Conscientiousness,
        ProfileField::Extraversion,
        ProfileField::Agreeableness,
        ProfileField::Neuroticism,
        ProfileField::Mood,
        ProfileField::StressLevel,
        ProfileField::EnergyLevel,
        ProfileField::RiskProfile,
        ProfileField::CommunicationStyle,
        ProfileField::EngagementScore,
        ProfileField::Interests,
        ProfileField::Motivations,
        ProfileField::Segments,
    ];

    pub fn path(&self) -> &'static str {
        match self {
            ProfileField::Openness => "personality_traits.openness",
            ProfileField::Conscientiousness => "personality_traits.conscientiousness",
            ProfileField::Extraversion => "personality_traits.extraversion",
            ProfileField::Agreeableness => "personality_traits.agreeableness",
            ProfileField::Neuroticism => "personality_traits.neuroticism",
            ProfileField::Mood => "emotional_state.mood",
            ProfileField::StressLevel => "emotional_state.stress_level",
            ProfileField::EnergyLevel => "emotional_state.energy_level",
            ProfileField::RiskProfile => "risk_profile",
            ProfileField::CommunicationStyle => "communication_style",
            ProfileField::EngagementScore => "engagement_score",
            ProfileField::Interests => "interests",
            ProfileField::Motivations => "motivations",
            ProfileField::Segments => "segments",
        }
    }

    /// Resolve this field against a profile. `None` when the value is absent.
    pub fn resolve<'a>(&self, profile: &'a UserProfile) -> Option<ProfileValue<'a>> {
        let traits = &profile.personality_traits;
        let emotion = &profile.emotional_state;
        match self {
            ProfileField::Openness => traits.openness.map(ProfileValue::Number),
            ProfileField::Conscientiousness => traits.conscientiousness.map(ProfileValue::Number),
            ProfileField::Extraversion => traits.extraversion.map(ProfileValue::Number),
            ProfileField::Agreeableness => traits.agreeableness.map(ProfileValue::Number),
            ProfileField::Neuroticism => traits.neuroticism.map(ProfileValue::Number),
            ProfileField::Mood => emotion.mood.as_deref().map(ProfileValue::Text),
            ProfileField::StressLevel => emotion.stress_level.map(ProfileValue::Number),
            ProfileField::EnergyLevel => emotion.energy_level.map(ProfileValue::Number),
            ProfileField::RiskProfile => profile.risk_profile.as_deref().map(ProfileValue::Text),
            ProfileField::CommunicationStyle => {
                profile.communication_style.as_deref().map(ProfileValue::Text)
            }
            ProfileField::EngagementScore => profile.engagement_score.map(ProfileValue::Number),
            ProfileField::Interests => Some(ProfileValue::List(&profile.interests)),
            ProfileField::Motivations => Some(ProfileValue::List(&profile.motivations)),
            ProfileField::Segments => Some(ProfileValue::List(&profile.segments)),
        }
    }
}

impl FromStr for ProfileField {
    type Err = EngageError;

    fn from_str(path: &str) -> Result<Self, Self::Err> {
        ProfileField::ALL
            .iter()
            .copied()
            .find(|field| field.path() == path)
            .ok_or_else(|| EngageError::Configuration(format!("unresolvable field path '{path}'")))
    }
}

impl fmt::Display for ProfileField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.path())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_path_round_trips() {
        for field in ProfileField::ALL {
            assert_eq!(field.path().parse::<ProfileField>().unwrap(), field);
        }
    }

    #[test]
    fn test_unknown_path_is_configuration_error() {
        let err = "personality_traits.nonexistent_field"
            .parse::<ProfileField>()
            .unwrap_err();
        assert!(matches!(err, EngageError::Configuration(_)));
        assert!("Personality_Traits.openness".parse::<ProfileField>().is_err());
    }

    #[test]
    fn test_resolve_present_and_absent() {
        let profile = UserProfile {
            user_id: "u1".into(),
            personality_traits: PersonalityTraits {
                openness: Some(0.8),
                ..Default::default()
            },
            risk_profile: Some("aggressive".into()),
            interests: vec!["crypto".into()],
            ..Default::default()
        };

        assert_eq!(
            ProfileField::Openness.resolve(&profile),
            Some(ProfileValue::Number(0.8))
        );
        assert_eq!(
            ProfileField::RiskProfile.resolve(&profile),
            Some(ProfileValue::Text("aggressive"))
        );
        assert_eq!(ProfileField::Neuroticism.resolve(&profile), None);
        assert_eq!(ProfileField::Mood.resolve(&profile), None);
        assert!(matches!(
            ProfileField::Interests.resolve(&profile),
            Some(ProfileValue::List(list)) if list.len() == 1
        ));
    }
}
