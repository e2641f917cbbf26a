use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Clone, Debug, Serialize, PartialEq, Eq)]
pub struct SurveyOption {
    pub id: &'static str,
    pub title: &'static str,
    pub category: &'static str,
    pub duration_minutes: u32,
    pub reward: u64,
    pub description: &'static str,
}

pub const CATALOG: [SurveyOption; 6] = [
    SurveyOption {
        id: "consumer-habits",
        title: "Consumer Shopping Habits",
        category: "Retail",
        duration_minutes: 5,
        reward: 45,
        description: "Tell us how and where you shop for everyday goods.",
    },
    SurveyOption {
        id: "mobile-banking",
        title: "Mobile Banking Experience",
        category: "Finance",
        duration_minutes: 7,
        reward: 60,
        description: "Share your experience with banking and payment apps.",
    },
    SurveyOption {
        id: "streaming-media",
        title: "Streaming & Entertainment",
        category: "Media",
        duration_minutes: 4,
        reward: 35,
        description: "What you watch, listen to, and pay for.",
    },
    SurveyOption {
        id: "health-lifestyle",
        title: "Health & Lifestyle",
        category: "Health",
        duration_minutes: 8,
        reward: 75,
        description: "Questions about exercise, diet, and wellbeing.",
    },
    SurveyOption {
        id: "transport-commute",
        title: "Daily Commute",
        category: "Transport",
        duration_minutes: 5,
        reward: 40,
        description: "How you get around and what it costs you.",
    },
    SurveyOption {
        id: "tech-gadgets",
        title: "Technology & Gadgets",
        category: "Technology",
        duration_minutes: 6,
        reward: 55,
        description: "Devices you own and the ones you want next.",
    },
];

pub fn find_survey(id: &str) -> Option<&'static SurveyOption> {
    CATALOG.iter().find(|survey| survey.id == id)
}

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
pub struct SurveyQuestion {
    pub id: usize,
    pub question: String,
    pub options: [String; 4],
}

pub fn fallback_questions() -> Vec<SurveyQuestion> {
    [
        (
            "How often do you use this kind of product or service?",
            ["Daily", "Weekly", "Monthly", "Rarely"],
        ),
        (
            "How satisfied are you with the options currently available?",
            [
                "Very satisfied",
                "Somewhat satisfied",
                "Somewhat dissatisfied",
                "Very dissatisfied",
            ],
        ),
        (
            "What matters most to you when choosing a provider?",
            ["Price", "Quality", "Convenience", "Reputation"],
        ),
        (
            "How much do you spend on this category each month?",
            ["Nothing", "A little", "A moderate amount", "A lot"],
        ),
        (
            "How likely are you to recommend your current choice to a friend?",
            ["Very likely", "Likely", "Unlikely", "Very unlikely"],
        ),
    ]
    .into_iter()
    .enumerate()
    .map(|(id, (question, options))| SurveyQuestion {
        id,
        question: question.to_string(),
        options: options.map(str::to_string),
    })
    .collect()
}

#[derive(Clone, Copy, Debug, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SurveyPhase {
    Generating,
    Active,
    Paused,
    Submitting,
    Completed,
}

/// Snapshot of the survey in progress as shown to the client.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SurveyStatus {
    pub attempt_id: Uuid,
    pub survey_id: String,
    pub phase: SurveyPhase,
    pub current: usize,
    pub total: usize,
    pub question: Option<SurveyQuestion>,
    pub selected: Option<usize>,
    pub seconds_left: u32,
    pub used_fallback: bool,
    pub reward: Option<u64>,
}
