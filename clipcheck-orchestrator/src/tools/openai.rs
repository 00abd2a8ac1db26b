//! Model-backed Analysis
//!
//! Fact-checking, report translation and thought translation over the
//! Responses API of an OpenAI-compatible provider.

use std::path::Path;

use async_trait::async_trait;
use chrono::Utc;
use clipcheck_core::domain::report::FactCheckReport;
use clipcheck_core::language::language_name;
use clipcheck_llm::{LlmClient, ResponseRequest, parse_json_relaxed};
use serde_json::{Value, json};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use super::AnalysisTools;
use super::transcribe::ChunkedTranscriber;
use crate::service::PipelineError;

const FACTCHECK_INSTRUCTIONS: &str = "\
You are a meticulous, skeptical fact-checker for short social media videos.

Extract the distinct, checkable factual claims of the transcript, verify each one with web search, \
give every claim a verdict, a confidence (0-100) and a weight (0-100) reflecting how central it is \
to the video's message, then assess potential harm.

Ads, calls to action, opinions, jokes, predictions, hypotheticals and personal anecdotes are not \
factual claims: use verdict not_a_factual_claim with weight 0. Prefer primary and authoritative \
sources and never invent sources. When evidence is weak or conflicting, say so and lower confidence.

Claim verdicts: supported, contradicted, mixed, unverifiable, not_a_factual_claim.
Overall verdicts: accurate, mostly_accurate, mixed, misleading, false, unverifiable.
Danger categories: medical_misinformation, financial_scam, illegal_instructions, self_harm, \
dangerous_challenge, hate_or_harassment, privacy_or_doxxing, other. Severity is 0-5.

Answer with a single JSON object with the keys summary, overall_score, overall_verdict, claims \
(claim, verdict, confidence, weight, explanation, correction, sources), danger (category, severity, \
description, mitigation), whats_right, whats_wrong, missing_context, sources_used (title, url, \
publisher) and limitations. Never omit keys: use null for unknown strings and [] for empty lists.";

const CORRECTIVE_INSTRUCTIONS: &str = "\
The previous answer was not valid JSON. Return the same fact-check report as one valid JSON object \
with no markdown fences and no commentary.";

/// Fact-check, translation and transcription through one provider
pub struct OpenAiAnalysis {
    client: LlmClient,
    transcriber: ChunkedTranscriber,
    factcheck_model: String,
    reasoning_effort: String,
    /// `None` disables report and thought translation
    translation_model: Option<String>,
}

impl OpenAiAnalysis {
    pub fn new(
        client: LlmClient,
        transcriber: ChunkedTranscriber,
        factcheck_model: impl Into<String>,
        reasoning_effort: impl Into<String>,
        translation_model: Option<String>,
    ) -> Self {
        Self {
            client,
            transcriber,
            factcheck_model: factcheck_model.into(),
            reasoning_effort: reasoning_effort.into(),
            translation_model: translation_model.filter(|m| !m.trim().is_empty()),
        }
    }

    /// Parses model output, asking once more for valid JSON if needed
    async fn parse_with_retry(&self, model: &str, text: &str) -> Result<Value, PipelineError> {
        match parse_json_relaxed(text) {
            Ok(value) => Ok(value),
            Err(e) => {
                warn!("Model output was not valid JSON, retrying once: {}", e);
                let request = ResponseRequest::new(model, text)
                    .with_instructions(CORRECTIVE_INSTRUCTIONS)
                    .json_output();
                let retry = self.client.create_response(&request).await?;
                parse_json_relaxed(&retry.text).map_err(|e| {
                    PipelineError::FactCheck(format!("Model did not return valid JSON: {e}"))
                })
            }
        }
    }
}

#[async_trait]
impl AnalysisTools for OpenAiAnalysis {
    async fn transcribe(&self, audio: &Path) -> Result<String, PipelineError> {
        self.transcriber.transcribe(audio).await
    }

    async fn fact_check_stream(
        &self,
        transcript: &str,
        url: &str,
        output_language: &str,
        thoughts: mpsc::Sender<String>,
    ) -> Result<(FactCheckReport, Value), PipelineError> {
        let request = ResponseRequest::new(
            &self.factcheck_model,
            factcheck_prompt(transcript, url, output_language),
        )
        .with_instructions(FACTCHECK_INSTRUCTIONS)
        .with_web_search()
        .with_reasoning(&self.reasoning_effort)
        .json_schema_output("fact_check_report", report_schema());

        let output = self.client.stream_response(&request, thoughts).await?;
        let value = self.parse_with_retry(&self.factcheck_model, &output.text).await?;
        let report = report_from_value(value)?;
        Ok((report, output.raw))
    }

    async fn translate_report(
        &self,
        report: &FactCheckReport,
        target_language: &str,
    ) -> Result<(FactCheckReport, Value), PipelineError> {
        let model = self
            .translation_model
            .as_deref()
            .ok_or_else(|| PipelineError::InvalidInput("Report translation is disabled.".to_string()))?;
        let lang = normalize_language(target_language, "ar");

        let source = serde_json::to_string_pretty(report)
            .map_err(|e| PipelineError::FactCheck(format!("Failed to serialize report: {e}")))?;
        let request = ResponseRequest::new(model, translation_prompt(&source, &lang))
            .with_temperature(0.3)
            .json_output();

        let output = self.client.create_response(&request).await?;
        let translated = self.parse_with_retry(model, &output.text).await?;

        let mut raw = output.raw;
        if let Some(obj) = raw.as_object_mut() {
            obj.insert("operation".to_string(), Value::from("translation"));
            obj.insert("target_language".to_string(), Value::from(lang.as_str()));
        }
        Ok((merge_translation(report, &translated), raw))
    }

    async fn translate_thought(&self, text: &str, target_language: &str) -> String {
        let lang = normalize_language(target_language, "en");
        let trimmed = text.trim();
        if lang == "en" || trimmed.is_empty() {
            return text.to_string();
        }
        let Some(model) = self.translation_model.as_deref() else {
            return text.to_string();
        };

        let name = language_name(&lang);
        let prompt = format!(
            "Translate this text to {name}. Translate verbatim without greetings or extra text.\n\n\
             Text to translate:\n{trimmed}\n\nOutput only the {name} translation."
        );
        let request = ResponseRequest::new(model, prompt).with_temperature(0.3);
        match self.client.create_response(&request).await {
            Ok(output) if !output.text.trim().is_empty() => output.text.trim().to_string(),
            Ok(_) => text.to_string(),
            Err(e) => {
                debug!("Thought translation failed: {}", e);
                text.to_string()
            }
        }
    }
}

// =============================================================================
// Prompts and report shaping
// =============================================================================

fn normalize_language(code: &str, fallback: &str) -> String {
    let code = code.trim().to_lowercase();
    if code.is_empty() { fallback.to_string() } else { code }
}

fn factcheck_prompt(transcript: &str, url: &str, output_language: &str) -> String {
    let lang = normalize_language(output_language, "ar");
    let name = language_name(&lang);
    let meta = if url.trim().is_empty() {
        String::new()
    } else {
        format!("Video URL: {}\n\n", url.trim())
    };
    format!(
        "{meta}Requested output language: {name} (code: {lang}).\n\
         Write every human-readable text field in that language. Do not translate JSON keys, \
         enum values, source titles or publishers.\n\n\
         Transcript (verbatim, may contain errors):\n{transcript}\n\n\
         Weights of scorable claims should add up to about 100. Deduplicate sources_used."
    )
}

fn translation_prompt(report_json: &str, lang: &str) -> String {
    let name = language_name(lang);
    format!(
        "Translate the following fact-check report JSON to {name} (code: {lang}).\n\
         Translate only summary, whats_right, whats_wrong, missing_context, limitations, the \
         claim, explanation and correction of each claim, and the description and mitigation of \
         each danger item. Keep keys, enum values, URLs, source titles, numbers and dates \
         unchanged. Do not add, remove or reorder list items. Return only valid JSON.\n\n\
         Report to translate:\n{report_json}"
    )
}

const CLAIM_VERDICTS: [&str; 5] = ["supported", "contradicted", "mixed", "unverifiable", "not_a_factual_claim"];
const OVERALL_VERDICTS: [&str; 6] = ["accurate", "mostly_accurate", "mixed", "misleading", "false", "unverifiable"];
const DANGER_CATEGORIES: [&str; 8] = [
    "medical_misinformation",
    "financial_scam",
    "illegal_instructions",
    "self_harm",
    "dangerous_challenge",
    "hate_or_harassment",
    "privacy_or_doxxing",
    "other",
];

/// Structured-output schema of the fact-check report
///
/// `generated_at` is stamped locally and not asked of the model.
fn report_schema() -> Value {
    let text = json!({ "type": "string" });
    let nullable_text = json!({ "type": ["string", "null"] });
    let text_list = json!({ "type": "array", "items": text });
    let source = json!({
        "type": "object",
        "properties": {
            "title": text,
            "url": text,
            "publisher": nullable_text,
        }
    });

    json!({
        "type": "object",
        "properties": {
            "summary": text,
            "overall_score": { "type": "integer" },
            "overall_verdict": { "type": "string", "enum": OVERALL_VERDICTS },
            "claims": {
                "type": "array",
                "items": {
                    "type": "object",
                    "properties": {
                        "claim": text,
                        "verdict": { "type": "string", "enum": CLAIM_VERDICTS },
                        "confidence": { "type": "integer" },
                        "weight": { "type": "integer" },
                        "explanation": text,
                        "correction": nullable_text,
                        "sources": { "type": "array", "items": source },
                    }
                }
            },
            "danger": {
                "type": "array",
                "items": {
                    "type": "object",
                    "properties": {
                        "category": { "type": "string", "enum": DANGER_CATEGORIES },
                        "severity": { "type": "integer" },
                        "description": text,
                        "mitigation": nullable_text,
                    }
                }
            },
            "whats_right": text_list,
            "whats_wrong": text_list,
            "missing_context": text_list,
            "sources_used": { "type": "array", "items": source },
            "limitations": nullable_text,
        }
    })
}

/// Builds a scored report from model JSON
fn report_from_value(mut value: Value) -> Result<FactCheckReport, PipelineError> {
    if let Some(obj) = value.as_object_mut() {
        obj.entry("generated_at")
            .or_insert_with(|| Value::from(Utc::now().to_rfc3339()));
    }
    let mut report: FactCheckReport = serde_json::from_value(value)
        .map_err(|e| PipelineError::FactCheck(format!("Model returned an invalid report: {e}")))?;
    report.apply_weighted_score();
    Ok(report)
}

fn non_blank(value: Option<&Value>) -> Option<String> {
    value
        .and_then(Value::as_str)
        .filter(|s| !s.trim().is_empty())
        .map(str::to_string)
}

/// Replaces `target` when `value` is a string list of the same length
fn merge_string_list(target: &mut Vec<String>, value: Option<&Value>) {
    let Some(items) = value.and_then(Value::as_array) else {
        return;
    };
    if items.len() != target.len() {
        return;
    }
    let strings: Option<Vec<String>> = items.iter().map(|v| v.as_str().map(str::to_string)).collect();
    if let Some(strings) = strings {
        *target = strings;
    }
}

/// Applies translated text fields onto a copy of `source`
///
/// Scores, verdicts, sources and timestamps always come from `source`.
fn merge_translation(source: &FactCheckReport, translated: &Value) -> FactCheckReport {
    let mut merged = source.clone();

    if let Some(summary) = non_blank(translated.get("summary")) {
        merged.summary = summary;
    }
    if let Some(limitations) = non_blank(translated.get("limitations")) {
        if merged.limitations.is_some() {
            merged.limitations = Some(limitations);
        }
    }
    merge_string_list(&mut merged.whats_right, translated.get("whats_right"));
    merge_string_list(&mut merged.whats_wrong, translated.get("whats_wrong"));
    merge_string_list(&mut merged.missing_context, translated.get("missing_context"));

    if let Some(claims) = translated.get("claims").and_then(Value::as_array) {
        if claims.len() == merged.claims.len() {
            for (claim, out) in merged.claims.iter_mut().zip(claims) {
                if let Some(text) = non_blank(out.get("claim")) {
                    claim.claim = text;
                }
                if let Some(text) = non_blank(out.get("explanation")) {
                    claim.explanation = text;
                }
                if claim.correction.is_some() {
                    if let Some(text) = non_blank(out.get("correction")) {
                        claim.correction = Some(text);
                    }
                }
            }
        }
    }

    if let Some(danger) = translated.get("danger").and_then(Value::as_array) {
        if danger.len() == merged.danger.len() {
            for (item, out) in merged.danger.iter_mut().zip(danger) {
                if let Some(text) = non_blank(out.get("description")) {
                    item.description = text;
                }
                if item.mitigation.is_some() {
                    if let Some(text) = non_blank(out.get("mitigation")) {
                        item.mitigation = Some(text);
                    }
                }
            }
        }
    }

    merged
}
