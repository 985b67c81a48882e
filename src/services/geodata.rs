//! Geodata pipeline: plain-language question in, OpenStreetMap data out.
//!
//! An LLM labels the question (feature, place, OSM element types) and writes
//! an Overpass query; Nominatim supplies the place's bounding box; Overpass
//! returns the data. The query and the data are written under the results
//! directory and their paths become the job's result fields.

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::config::AppConfig;
use crate::models::ask::question_from_input;
use crate::models::job::ResultFields;
use crate::services::pipeline::{Pipeline, PipelineError};

const REQUIRED_TOKENS: [&str; 3] = ["geospatial_feature", "place", "osm_types"];

const LABEL_PROMPT: &str = "\
Label the geospatial feature, place, and osm types in the following sentence.
Return it in json format, make keys snake case, and return the osm types in a list.
Remember, osm types include nodes, ways, and relations.
One more thing, geospatial features are points of interests, transportation features, or natural features.

{question}";

const QUERY_PROMPT: &str = "\
Generate an Overpass API query that will download all {feature} inside the bbox.
{feature} can be {osm_types}.
Make sure bbox is lowercased and do not surround it with {{}}";

/// What the LLM made of the question.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuestionTokens {
    pub geospatial_feature: String,
    pub place: String,
    pub osm_types: Vec<String>,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Deserialize)]
struct ChatMessage {
    content: String,
}

#[derive(Deserialize)]
struct NominatimPlace {
    boundingbox: Vec<String>,
}

pub struct GeodataPipeline {
    http: Client,
    openai_url: String,
    openai_model: String,
    openai_api_key: Option<String>,
    nominatim_url: String,
    overpass_url: String,
    results_dir: PathBuf,
}

impl GeodataPipeline {
    pub fn new(config: &AppConfig) -> Result<Self, PipelineError> {
        // Nominatim's usage policy requires an identifying user agent.
        let http = Client::builder()
            .user_agent(concat!("hal-broker/", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_secs(120))
            .build()?;

        Ok(Self {
            http,
            openai_url: config.openai_url.clone(),
            openai_model: config.openai_model.clone(),
            openai_api_key: config.openai_api_key.clone(),
            nominatim_url: config.nominatim_url.clone(),
            overpass_url: config.overpass_url.clone(),
            results_dir: config.results_dir.clone(),
        })
    }

    async fn complete(&self, prompt: String) -> Result<String, PipelineError> {
        let api_key = self
            .openai_api_key
            .as_deref()
            .ok_or(PipelineError::NotConfigured("HAL_OPENAI_API_KEY"))?;

        let request_body = json!({
            "model": self.openai_model,
            "temperature": 0.5,
            "max_tokens": 256,
            "messages": [{ "role": "user", "content": prompt }],
        });

        let response = self
            .http
            .post(&self.openai_url)
            .bearer_auth(api_key)
            .json(&request_body)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(PipelineError::Upstream {
                service: "OpenAI",
                status: response.status(),
            });
        }

        let chat: ChatResponse = response.json().await?;
        chat.choices
            .into_iter()
            .next()
            .map(|choice| choice.message.content)
            .ok_or_else(|| PipelineError::Parse {
                what: "completion",
                reason: "no choices returned".to_string(),
            })
    }

    async fn bounding_box(&self, place: &str) -> Result<String, PipelineError> {
        let response = self
            .http
            .get(&self.nominatim_url)
            .query(&[
                ("q", place),
                ("polygon_geojson", "1"),
                ("format", "jsonv2"),
            ])
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(PipelineError::Upstream {
                service: "Nominatim",
                status: response.status(),
            });
        }

        let places: Vec<NominatimPlace> = response.json().await?;
        places
            .first()
            .and_then(|p| overpass_bbox(&p.boundingbox))
            .ok_or_else(|| PipelineError::UnknownPlace("Nominatim".to_string()))
    }

    async fn fetch_overpass(&self, query: &str) -> Result<String, PipelineError> {
        let response = self
            .http
            .post(&self.overpass_url)
            .form(&[("data", query)])
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(PipelineError::Upstream {
                service: "Overpass",
                status: response.status(),
            });
        }

        Ok(response.text().await?)
    }

    async fn write_output(&self, folder: &str, file_name: &str, contents: &str) -> Result<String, PipelineError> {
        let dir = self.results_dir.join(folder);
        tokio::fs::create_dir_all(&dir).await?;
        tokio::fs::write(dir.join(file_name), contents).await?;
        Ok(format!("results/{folder}/{file_name}"))
    }
}

#[async_trait]
impl Pipeline for GeodataPipeline {
    async fn run(&self, input: &str) -> Result<ResultFields, PipelineError> {
        let question = question_from_input(input);

        let labels = self
            .complete(LABEL_PROMPT.replace("{question}", &question))
            .await?;
        let tokens = parse_tokens(&labels)?;
        tracing::debug!(
            place = %tokens.place,
            feature = %tokens.geospatial_feature,
            osm_types = ?tokens.osm_types,
            "Question labelled"
        );

        let raw_query = self
            .complete(
                QUERY_PROMPT
                    .replace("{feature}", &tokens.geospatial_feature)
                    .replace("{osm_types}", &tokens.osm_types.join(" or ")),
            )
            .await?;

        let bbox = self.bounding_box(&tokens.place).await?;
        let query = prepare_query(&raw_query, &bbox);

        let folder = folder_name(&tokens, &Utc::now().to_rfc3339());
        let query_file_name = self
            .write_output(&folder, &format!("{folder}.overpass.query"), &query)
            .await?;

        let start = std::time::Instant::now();
        let data = self.fetch_overpass(&query).await.inspect_err(|_| {
            tracing::warn!(query_file = %query_file_name, "Overpass rejected the generated query");
        })?;
        tracing::info!(
            overpass_ms = start.elapsed().as_millis() as u64,
            bytes = data.len(),
            "Overpass data fetched"
        );

        let data_file_name = self
            .write_output(&folder, &format!("{folder}.overpass.json"), &data)
            .await?;

        let mut fields = ResultFields::new();
        fields.insert("place".to_string(), json!(tokens.place));
        fields.insert("geospatial_feature".to_string(), json!(tokens.geospatial_feature));
        fields.insert("osm_types".to_string(), json!(tokens.osm_types));
        fields.insert("overpass_query".to_string(), json!(query));
        fields.insert("query_file_name".to_string(), json!(query_file_name));
        fields.insert("data_file_name".to_string(), json!(data_file_name));
        Ok(fields)
    }
}

/// Parse the labelling completion into tokens.
///
/// Every required token must be present and non-null. `osm_types` may come
/// back as a single string instead of a list.
pub fn parse_tokens(completion: &str) -> Result<QuestionTokens, PipelineError> {
    let value: Value =
        serde_json::from_str(strip_fences(completion)).map_err(|e| PipelineError::Parse {
            what: "question labels",
            reason: e.to_string(),
        })?;

    let object = value.as_object().ok_or_else(|| PipelineError::Parse {
        what: "question labels",
        reason: "not a JSON object".to_string(),
    })?;

    let missing: Vec<&str> = REQUIRED_TOKENS
        .iter()
        .copied()
        .filter(|key| object.get(*key).map_or(true, Value::is_null))
        .collect();
    if !missing.is_empty() {
        return Err(PipelineError::MissingTokens(missing.join(", ")));
    }

    let text = |key: &str| -> Result<String, PipelineError> {
        object[key]
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| PipelineError::MissingTokens(key.to_string()))
    };

    let osm_types = match &object["osm_types"] {
        Value::String(single) => vec![single.clone()],
        Value::Array(items) => items
            .iter()
            .filter_map(Value::as_str)
            .map(str::to_string)
            .collect(),
        _ => Vec::new(),
    };
    if osm_types.is_empty() {
        return Err(PipelineError::MissingTokens("osm_types".to_string()));
    }

    Ok(QuestionTokens {
        geospatial_feature: text("geospatial_feature")?,
        place: text("place")?,
        osm_types,
    })
}

/// Nominatim gives `[south, north, west, east]`; Overpass wants
/// `south,west,north,east`.
pub fn overpass_bbox(boundingbox: &[String]) -> Option<String> {
    match boundingbox {
        [south, north, west, east] => Some(format!("{south},{west},{north},{east}")),
        _ => None,
    }
}

/// Strip markdown fences from a generated query and fill in the bbox.
pub fn prepare_query(raw: &str, bbox: &str) -> String {
    strip_fences(raw).replace("bbox", bbox)
}

fn strip_fences(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(inner) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    // Drop a language tag on the opening fence.
    let inner = match inner.find('\n') {
        Some(newline) if inner[..newline].chars().all(|c| c.is_ascii_alphanumeric()) => {
            &inner[newline + 1..]
        }
        _ => inner,
    };
    inner.trim_end().trim_end_matches("```").trim()
}

/// Folder for one job's output, unique per run and safe in a URL path.
pub fn folder_name(tokens: &QuestionTokens, timestamp: &str) -> String {
    let raw = format!(
        "{}_{}_{}_{}",
        tokens.place,
        tokens.geospatial_feature,
        tokens.osm_types.join("-"),
        timestamp
    );
    raw.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.') {
                c
            } else {
                '-'
            }
        })
        .collect()
}
