use crate::llm::{GenerateRequest, GenerationResult, LlmClient};

use super::work_item::WorkItem;

/// Section headings every generated prompt must carry, in order.
pub const OUTPUT_SECTIONS: [&str; 6] = [
    "Overview",
    "Requirements",
    "Technical Approach",
    "Implementation Steps",
    "Testing Strategy",
    "Acceptance Criteria",
];

const SYSTEM_PREAMBLE: &str = "You are an expert prompt engineer. You write precise, \
    self-contained prompts that instruct an AI coding assistant to build one software feature. \
    Your prompts are unambiguous, reference concrete behaviour, and leave no decision implicit.";

/// System and user text for one work item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerationRequest {
    pub system_text: String,
    pub user_text: String,
}

/// Renders the prompt pair for `item`. Pure: equal inputs give byte-identical output.
pub fn build(item: &WorkItem, sample_text: &str) -> GenerationRequest {
    let mut system_text = String::from(SYSTEM_PREAMBLE);
    system_text.push_str(
        "\n\nRespond in Markdown only, with no text before the first heading. \
        Use exactly these six level-two sections, in this order:\n",
    );
    for (index, section) in OUTPUT_SECTIONS.iter().enumerate() {
        system_text.push_str(&format!("{}. ## {section}\n", index + 1));
    }

    let user_text = format!(
        "Write the feature-building prompt that will be saved as `{name}`.\n\n\
        Match the tone, depth and structure of the following sample prompt, \
        but adapt the content to the feature implied by the file name.\n\n\
        --- SAMPLE START ---\n{sample_text}\n--- SAMPLE END ---",
        name = item.name(),
    );

    GenerationRequest {
        system_text,
        user_text,
    }
}

/// Outcome of generating one work item, tagged with its name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemResult {
    pub name: String,
    pub result: GenerationResult,
}

pub struct ArtifactGenerator<'a> {
    client: &'a LlmClient,
    model: String,
    temperature: f32,
    max_tokens: u32,
}

impl<'a> ArtifactGenerator<'a> {
    pub fn new(client: &'a LlmClient, model: String, temperature: f32, max_tokens: u32) -> Self {
        Self {
            client,
            model,
            temperature,
            max_tokens,
        }
    }

    pub fn provider_name(&self) -> &str {
        self.client.provider_name()
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    #[tracing::instrument(
        name = "pipeline_stage generate",
        skip(self, item, sample_text),
        fields(
            pipeline.stage = "generate",
            batch.work_item = %item.name(),
            generation.outcome = tracing::field::Empty,
        )
    )]
    pub async fn generate(&self, item: &WorkItem, sample_text: &str) -> ItemResult {
        let request = build(item, sample_text);

        let result = self
            .client
            .generate(&GenerateRequest {
                model: self.model.clone(),
                system: request.system_text,
                prompt: request.user_text,
                temperature: self.temperature,
                max_tokens: self.max_tokens,
                work_item: item.name().to_string(),
            })
            .await;

        let outcome = match &result {
            GenerationResult::Success { .. } => "success",
            GenerationResult::Failure { reason, .. } => reason.as_str(),
        };
        tracing::Span::current().record("generation.outcome", outcome);

        ItemResult {
            name: item.name().to_string(),
            result,
        }
    }
}
