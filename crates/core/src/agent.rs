//! Agent classifications and their presentation profiles.
//!
//! Everything that varies per classification (and, for the two-phase
//! exercise, per phase) lives in a single lookup keyed by
//! `(AgentKind, Phase)`. Adding a classification is a data change here,
//! not a control-flow change anywhere else.

use serde::{Deserialize, Serialize};
use std::fmt;

/// The category selecting which remote conversational persona to face.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentKind {
    /// Press conference: hostile journalist questions.
    Press,
    /// Shareholder general assembly.
    Assembly,
    /// Investor pitch meeting.
    Investors,
    /// Two-phase exercise: record an official statement, then face live
    /// questions about it.
    Statement,
}

impl AgentKind {
    /// Whether this classification runs the declaration-then-questions
    /// workflow instead of a single conversational phase.
    pub fn is_two_phase(&self) -> bool {
        matches!(self, AgentKind::Statement)
    }

    /// The phase a fresh exercise of this kind starts in.
    pub fn initial_phase(&self) -> Phase {
        if self.is_two_phase() {
            Phase::Declaration
        } else {
            Phase::Conversation
        }
    }

    /// Stable wire identifier, used in endpoint payloads and env var lookups.
    pub fn as_str(&self) -> &'static str {
        match self {
            AgentKind::Press => "press",
            AgentKind::Assembly => "assembly",
            AgentKind::Investors => "investors",
            AgentKind::Statement => "statement",
        }
    }

    /// Parses a wire identifier back into a classification.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "press" => Some(AgentKind::Press),
            "assembly" => Some(AgentKind::Assembly),
            "investors" => Some(AgentKind::Investors),
            "statement" => Some(AgentKind::Statement),
            _ => None,
        }
    }
}

impl fmt::Display for AgentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A distinct sub-stage of an exercise. Single-phase classifications only
/// ever see `Conversation`; the two-phase classification moves one way from
/// `Declaration` to `Questions`, at most once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Conversation,
    Declaration,
    Questions,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Conversation => "conversation",
            Phase::Declaration => "declaration",
            Phase::Questions => "questions",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Static presentation and media configuration for one `(kind, phase)` pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AgentProfile {
    /// Exercise title shown in the header.
    pub title: &'static str,
    /// Persona name of the remote interlocutor.
    pub persona: &'static str,
    /// Persona role line shown under the title.
    pub role: &'static str,
    /// Icon slug for the exercise card.
    pub icon: &'static str,
    /// The interlocutor's opening line.
    pub opening_line: &'static str,
    /// Looping clip shown while the agent is silent.
    pub idle_video: &'static str,
    /// Pool of looping clips cycled through while the agent speaks.
    pub talking_videos: &'static [&'static str],
}

const IDLE_VIDEO: &str = "/videos/not_talking.mp4";
const TALKING_VIDEOS: &[&str] = &["/videos/talking1.mp4", "/videos/talking3.mp4"];

/// Looks up the profile for a classification and phase.
///
/// Phases a classification never enters fall back to its canonical profile,
/// so callers do not have to handle an impossible combination.
pub fn profile_for(kind: AgentKind, phase: Phase) -> &'static AgentProfile {
    match (kind, phase) {
        (AgentKind::Press, _) => &AgentProfile {
            title: "Conférence de Presse",
            persona: "Christophe Dubois",
            role: "Journaliste",
            icon: "noto:studio-microphone",
            opening_line: "Bonjour, je suis Christophe Dubois, journaliste. Pouvez-vous commencer par vous présenter et nous expliquer l'objet de cette rencontre ?",
            idle_video: IDLE_VIDEO,
            talking_videos: TALKING_VIDEOS,
        },
        (AgentKind::Assembly, _) => &AgentProfile {
            title: "Assemblée Générale",
            persona: "Christophe Leclerc",
            role: "Président",
            icon: "fluent-color:people-community-16",
            opening_line: "Mesdames et messieurs les actionnaires, bienvenue à cette assemblée générale. Je vous invite à présenter les résultats de l'exercice écoulé.",
            idle_video: IDLE_VIDEO,
            talking_videos: TALKING_VIDEOS,
        },
        (AgentKind::Investors, _) => &AgentProfile {
            title: "Réunion Investisseurs",
            persona: "Christophe Martin",
            role: "Directeur Financier",
            icon: "fluent-emoji:money-bag",
            opening_line: "Bonjour, je suis Christophe Martin. Pouvez-vous nous présenter votre projet et nous expliquer pourquoi nous devrions investir ?",
            idle_video: IDLE_VIDEO,
            talking_videos: TALKING_VIDEOS,
        },
        (AgentKind::Statement, Phase::Questions) => &AgentProfile {
            title: "Questions des Journalistes",
            persona: "Christophe Morel",
            role: "Journaliste",
            icon: "noto:studio-microphone",
            opening_line: "Merci pour cette déclaration. J'aurais quelques questions à vous poser sur ce que vous venez d'annoncer.",
            idle_video: IDLE_VIDEO,
            talking_videos: TALKING_VIDEOS,
        },
        (AgentKind::Statement, _) => &AgentProfile {
            title: "Déclaration Officielle",
            persona: "Christophe Morel",
            role: "Attaché de presse",
            icon: "noto:rolled-up-newspaper",
            opening_line: "Nous vous écoutons. Vous pouvez lire votre déclaration quand vous êtes prêt.",
            idle_video: IDLE_VIDEO,
            talking_videos: TALKING_VIDEOS,
        },
    }
}

/// Formats an elapsed-seconds counter as `MM:SS` for the session header.
pub fn format_elapsed(secs: u32) -> String {
    format!("{:02}:{:02}", secs / 60, secs % 60)
}
