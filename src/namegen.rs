use crate::config::NamegenConfig;
use crate::http::build_client;
use chrono::Local;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use thiserror::Error;
use tracing::info;

#[derive(Debug, Error)]
pub enum NamegenError {
    #[error("Company is required")]
    MissingCompany,
    #[error("Name generation API key not configured")]
    MissingApiKey,
    #[error("Name generation request failed: {0}")]
    Transport(String),
    #[error("Name generation API error: HTTP {0}")]
    Upstream(u16),
    #[error("No valid list found in API response")]
    Unparseable,
}

impl NamegenError {
    pub fn is_input(&self) -> bool {
        matches!(self, NamegenError::MissingCompany)
    }
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
    max_tokens: u32,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ChatResponseMessage {
    #[serde(default)]
    content: String,
}

#[derive(Debug)]
pub struct GeneratedProducts {
    pub products: Vec<String>,
    pub output_text: String,
}

/// Chat-completion client that turns a company reference into an
/// alphabetized product-name list of exactly the requested size.
pub struct NamegenClient {
    config: NamegenConfig,
    client: Client,
}

impl NamegenClient {
    pub fn new(config: NamegenConfig) -> Self {
        let client = build_client(config.timeout);
        Self { config, client }
    }

    pub async fn generate(
        &self,
        company: &str,
        website: &str,
        count: usize,
        extra_prompt: &str,
    ) -> Result<GeneratedProducts, NamegenError> {
        let company = company.trim();
        if company.is_empty() {
            return Err(NamegenError::MissingCompany);
        }
        if self.config.api_key.is_empty() {
            return Err(NamegenError::MissingApiKey);
        }

        let company_ref = if website.is_empty() {
            company.to_string()
        } else {
            format!("{company} ({website})")
        };
        let prompt = build_prompt(&company_ref, count, extra_prompt);

        info!(
            target = "itemgen.namegen",
            company, count, model = %self.config.model, "generating product names"
        );

        let response = self
            .client
            .post(format!("{}/chat/completions", self.config.base_url))
            .bearer_auth(&self.config.api_key)
            .json(&ChatRequest {
                model: &self.config.model,
                messages: vec![ChatMessage {
                    role: "user",
                    content: &prompt,
                }],
                temperature: 0.1,
                max_tokens: 1000,
            })
            .send()
            .await
            .map_err(|err| NamegenError::Transport(err.to_string()))?;

        if !response.status().is_success() {
            return Err(NamegenError::Upstream(response.status().as_u16()));
        }

        let payload: ChatResponse = response
            .json()
            .await
            .map_err(|err| NamegenError::Transport(err.to_string()))?;
        let content = payload
            .choices
            .first()
            .map(|c| c.message.content.trim().to_string())
            .unwrap_or_default();

        let products = parse_product_list(&content, company, count)?;
        let output_text = render_output(&products, company, &company_ref, count, &self.config.model);
        Ok(GeneratedProducts {
            products,
            output_text,
        })
    }
}

fn build_prompt(company_ref: &str, count: usize, extra_prompt: &str) -> String {
    let mut prompt = format!(
        "Return a Python list of exactly {count} {company_ref} products as strings, in this exact format:\n\n\
         [\"Product1\", \"Product2\", \"Product3\", ..., \"Product{count}\"]\n\n\
         - Sort alphabetically\n\
         - Double quotes\n\
         - Comma + space\n\
         - No extra text\n\
         - One per entry\n\
         - Natural spaces (e.g., \"Running Shoe\")"
    );
    if !extra_prompt.is_empty() {
        prompt.push_str("\n\n");
        prompt.push_str(extra_prompt);
    }
    prompt
}

/// Extracts the first bracketed list from the model output, deduplicates and
/// sorts the entries, then truncates or pads to exactly `count` names.
fn parse_product_list(
    content: &str,
    company: &str,
    count: usize,
) -> Result<Vec<String>, NamegenError> {
    let open = content.find('[').ok_or(NamegenError::Unparseable)?;
    let close = content[open..]
        .find(']')
        .map(|idx| open + idx)
        .ok_or(NamegenError::Unparseable)?;
    let inner = &content[open + 1..close];

    let unique: BTreeSet<String> = inner
        .split(',')
        .map(|entry| entry.trim().trim_matches(['"', '\'']).trim().to_string())
        .filter(|entry| !entry.is_empty())
        .collect();

    let mut products: Vec<String> = unique.into_iter().take(count).collect();
    while products.len() < count {
        products.push(format!("{company} Item {}", products.len() + 1));
    }
    Ok(products)
}

fn render_output(
    products: &[String],
    company: &str,
    company_ref: &str,
    count: usize,
    model: &str,
) -> String {
    let formatted = format!("[\"{}\"]", products.join("\", \""));
    format!(
        "# {count} {company} Products (via chat-completions API)\n\
         # Generated: {}\n\
         # Reference: {company_ref}\n\
         # Model: {model}\n\
         {formatted}\n",
        Local::now().format("%Y-%m-%d %H:%M:%S")
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bracketed_list_is_sorted_and_deduplicated() {
        let content = "Here you go:\n[\"Zip Hoodie\", \"Air Max\", 'Air Max', \"Crew Sock\"]";
        let products = parse_product_list(content, "Nike", 3).unwrap();
        assert_eq!(products, vec!["Air Max", "Crew Sock", "Zip Hoodie"]);
    }

    #[test]
    fn short_lists_are_padded_with_positional_names() {
        let products = parse_product_list("[\"Mug\"]", "Acme", 3).unwrap();
        assert_eq!(products, vec!["Mug", "Acme Item 2", "Acme Item 3"]);
    }

    #[test]
    fn oversized_lists_are_truncated_to_count() {
        let products = parse_product_list("[\"A\", \"B\", \"C\", \"D\"]", "X", 2).unwrap();
        assert_eq!(products, vec!["A", "B"]);
    }

    #[test]
    fn missing_brackets_are_an_error() {
        assert!(matches!(
            parse_product_list("no list here", "X", 3),
            Err(NamegenError::Unparseable)
        ));
    }

    #[test]
    fn prompt_carries_the_count_and_extra_instructions() {
        let prompt = build_prompt("Nike (nike.com)", 5, "only shoes");
        assert!(prompt.contains("exactly 5 Nike (nike.com) products"));
        assert!(prompt.ends_with("only shoes"));
    }

    #[test]
    fn output_text_embeds_the_formatted_list() {
        let out = render_output(
            &["A".into(), "B".into()],
            "Acme",
            "Acme",
            2,
            "test-model",
        );
        assert!(out.contains("[\"A\", \"B\"]"));
        assert!(out.contains("# Model: test-model"));
    }
}
