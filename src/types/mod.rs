use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::GatewayError;
use crate::gateway::budget::DowngradeProposal;

/// Semantic purpose of an AI call. Drives model routing and cost tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    Translation,
    Classification,
    Summarization,
    Chat,
    Verification,
    LegalAnalysis,
    VisualAnalysis,
    Embeddings,
    Moderation,
    Extraction,
    SentimentAnalysis,
    QuestionAnswering,
    ReportGeneration,
    CodeGeneration,
    DataAnalysis,
    DocumentComparison,
    EntityRecognition,
    KeywordExtraction,
    TitleGeneration,
    Rewriting,
    Research,
    AgentPlanning,
}

impl Operation {
    pub const ALL: [Operation; 22] = [
        Operation::Translation,
        Operation::Classification,
        Operation::Summarization,
        Operation::Chat,
        Operation::Verification,
        Operation::LegalAnalysis,
        Operation::VisualAnalysis,
        Operation::Embeddings,
        Operation::Moderation,
        Operation::Extraction,
        Operation::SentimentAnalysis,
        Operation::QuestionAnswering,
        Operation::ReportGeneration,
        Operation::CodeGeneration,
        Operation::DataAnalysis,
        Operation::DocumentComparison,
        Operation::EntityRecognition,
        Operation::KeywordExtraction,
        Operation::TitleGeneration,
        Operation::Rewriting,
        Operation::Research,
        Operation::AgentPlanning,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::Translation => "translation",
            Operation::Classification => "classification",
            Operation::Summarization => "summarization",
            Operation::Chat => "chat",
            Operation::Verification => "verification",
            Operation::LegalAnalysis => "legal_analysis",
            Operation::VisualAnalysis => "visual_analysis",
            Operation::Embeddings => "embeddings",
            Operation::Moderation => "moderation",
            Operation::Extraction => "extraction",
            Operation::SentimentAnalysis => "sentiment_analysis",
            Operation::QuestionAnswering => "question_answering",
            Operation::ReportGeneration => "report_generation",
            Operation::CodeGeneration => "code_generation",
            Operation::DataAnalysis => "data_analysis",
            Operation::DocumentComparison => "document_comparison",
            Operation::EntityRecognition => "entity_recognition",
            Operation::KeywordExtraction => "keyword_extraction",
            Operation::TitleGeneration => "title_generation",
            Operation::Rewriting => "rewriting",
            Operation::Research => "research",
            Operation::AgentPlanning => "agent_planning",
        }
    }

    /// Fixed instructions for the operation. Never derived from user input.
    pub fn system_prompt(&self) -> &'static str {
        match self {
            Operation::Translation => {
                "You are a translation assistant. Translate the provided text faithfully, preserving meaning and tone."
            }
            Operation::Classification => {
                "You are a classification assistant. Assign the provided text to the most appropriate category and answer with the category only."
            }
            Operation::Summarization => {
                "You are a summarization assistant. Produce a concise, accurate summary of the provided text."
            }
            Operation::Chat => "You are a helpful research assistant.",
            Operation::Verification => {
                "You are a fact verification assistant. Assess whether the provided claims are supported and explain briefly."
            }
            Operation::LegalAnalysis => {
                "You are a legal analysis assistant. Identify relevant clauses, obligations and risks in the provided text. You do not give legal advice."
            }
            Operation::VisualAnalysis => {
                "You are a visual analysis assistant. Describe and analyze the provided images together with the accompanying text."
            }
            Operation::Embeddings => "Embed the provided text.",
            Operation::Moderation => {
                "You are a content moderation assistant. Flag harmful, abusive or policy-violating content in the provided text."
            }
            Operation::Extraction => {
                "You are an information extraction assistant. Extract the requested structured facts from the provided text."
            }
            Operation::SentimentAnalysis => {
                "You are a sentiment analysis assistant. Report the overall sentiment of the provided text."
            }
            Operation::QuestionAnswering => {
                "You are a question answering assistant. Answer using only the provided material and say so when the answer is not present."
            }
            Operation::ReportGeneration => {
                "You are a report writing assistant. Produce a well-structured report from the provided material."
            }
            Operation::CodeGeneration => {
                "You are a coding assistant. Produce correct, minimal code for the described task."
            }
            Operation::DataAnalysis => {
                "You are a data analysis assistant. Analyze the provided data and report notable findings."
            }
            Operation::DocumentComparison => {
                "You are a document comparison assistant. Identify the differences and similarities between the provided documents."
            }
            Operation::EntityRecognition => {
                "You are an entity recognition assistant. List the named entities found in the provided text with their types."
            }
            Operation::KeywordExtraction => {
                "You are a keyword extraction assistant. List the most relevant keywords of the provided text."
            }
            Operation::TitleGeneration => {
                "You are a title generation assistant. Suggest a short, descriptive title for the provided text."
            }
            Operation::Rewriting => {
                "You are a writing assistant. Rewrite the provided text for clarity while preserving its meaning."
            }
            Operation::Research => {
                "You are a research assistant. Investigate the provided question thoroughly and cite the material you rely on."
            }
            Operation::AgentPlanning => {
                "You are a planning assistant. Break the provided goal into ordered, concrete steps."
            }
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Operation {
    type Err = GatewayError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let raw = raw.trim();
        Operation::ALL
            .iter()
            .copied()
            .find(|op| op.as_str().eq_ignore_ascii_case(raw))
            .ok_or_else(|| GatewayError::UnknownOperation {
                operation: raw.to_string(),
            })
    }
}

/// Quality tier requested by the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Quality {
    #[serde(alias = "economy", alias = "fast")]
    Low,
    #[serde(alias = "balanced", alias = "medium")]
    Standard,
    #[serde(alias = "premium")]
    High,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AiRequest {
    #[serde(alias = "userId")]
    pub user_id: String,
    #[serde(alias = "projectId")]
    pub project_id: String,
    pub operation: String,
    #[serde(alias = "userInput")]
    pub user_input: String,
    #[serde(default)]
    pub images: Vec<String>,
    #[serde(default, alias = "desiredQuality", skip_serializing_if = "Option::is_none")]
    pub desired_quality: Option<Quality>,
    #[serde(default, alias = "desiredModel", skip_serializing_if = "Option::is_none")]
    pub desired_model: Option<String>,
}

impl AiRequest {
    pub fn new(
        user_id: impl Into<String>,
        project_id: impl Into<String>,
        operation: impl Into<String>,
        user_input: impl Into<String>,
    ) -> Self {
        Self {
            user_id: user_id.into(),
            project_id: project_id.into(),
            operation: operation.into(),
            user_input: user_input.into(),
            images: Vec::new(),
            desired_quality: None,
            desired_model: None,
        }
    }

    pub fn with_images(mut self, images: Vec<String>) -> Self {
        self.images = images;
        self
    }

    pub fn with_quality(mut self, quality: Quality) -> Self {
        self.desired_quality = Some(quality);
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.desired_model = Some(model.into());
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Usage {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub total_tokens: u64,
}

impl Usage {
    pub fn new(input_tokens: u64, output_tokens: u64) -> Self {
        Self {
            input_tokens,
            output_tokens,
            total_tokens: input_tokens.saturating_add(output_tokens),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    Text { text: String },
    Image { url: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: Vec<ContentPart>,
}

impl Message {
    pub fn system(text: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: vec![ContentPart::Text { text: text.into() }],
        }
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: vec![ContentPart::Text { text: text.into() }],
        }
    }

    pub fn with_images(mut self, urls: &[String]) -> Self {
        self.content.extend(
            urls.iter()
                .map(|url| ContentPart::Image { url: url.clone() }),
        );
        self
    }

    /// Concatenated text parts.
    pub fn text(&self) -> String {
        self.content
            .iter()
            .filter_map(|part| match part {
                ContentPart::Text { text } => Some(text.as_str()),
                ContentPart::Image { .. } => None,
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionError {
    pub code: String,
    pub message: String,
}

impl From<&GatewayError> for ExecutionError {
    fn from(err: &GatewayError) -> Self {
        Self {
            code: err.code().to_string(),
            message: err.to_string(),
        }
    }
}

/// Uniform envelope returned for every terminal outcome of a gateway call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub success: bool,
    pub blocked: bool,
    #[serde(default)]
    pub threats: Vec<String>,
    pub request_id: String,
    pub usage: Usage,
    pub cost: f64,
    pub duration_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub risk_score: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ExecutionError>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub downgrade: Option<DowngradeProposal>,
}

impl ExecutionResult {
    pub fn outcome(&self) -> Outcome {
        if self.success {
            Outcome::Completed
        } else if self.blocked {
            Outcome::Blocked
        } else {
            Outcome::Failed
        }
    }
}

/// Terminal state of a dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Completed,
    Blocked,
    Failed,
}

impl Outcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Outcome::Completed => "completed",
            Outcome::Blocked => "blocked",
            Outcome::Failed => "failed",
        }
    }
}

impl FromStr for Outcome {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw {
            "completed" => Ok(Outcome::Completed),
            "blocked" => Ok(Outcome::Blocked),
            "failed" => Ok(Outcome::Failed),
            other => Err(format!("unknown outcome {other:?}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn operation_round_trips_through_str() {
        for op in Operation::ALL {
            assert_eq!(op.as_str().parse::<Operation>().unwrap(), op);
        }
        let err = "astrology".parse::<Operation>().unwrap_err();
        assert_eq!(err.code(), "unknown_operation");
    }

    #[test]
    fn request_accepts_camel_case_fields() {
        let raw = r#"{
            "userId": "u1",
            "projectId": "p1",
            "operation": "chat",
            "userInput": "hello",
            "desiredQuality": "premium"
        }"#;
        let request: AiRequest = serde_json::from_str(raw).unwrap();
        assert_eq!(request.user_id, "u1");
        assert_eq!(request.desired_quality, Some(Quality::High));
        assert!(request.images.is_empty());
    }

    #[test]
    fn usage_total_is_sum() {
        let usage = Usage::new(12, 30);
        assert_eq!(usage.total_tokens, 42);
    }
}
