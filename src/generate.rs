//! Generation collaborators: prompt chat, image endpoint, and the run that ties
//! them to the catalog.
//!
//! Generation writes blobs and catalog rows outside any sync window; the next
//! sync picks them up.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::catalog::CatalogStore;
use crate::config::Config;
use crate::model::NewImage;

mod genai;
mod wallpaper;

pub use self::genai::GenAiSession;
pub use self::wallpaper::{GeneratedWallpaper, WallpaperClient, WallpaperSource, render_url};

/// A stateful request/response conversation that yields prompt batches.
pub trait PromptSession {
    /// Send one user turn and return the model's raw reply text.
    fn send(&mut self, message: &str) -> Result<String>;
}

/// Shape every reply is asked to take.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct PromptBatch {
    #[serde(default)]
    pub items: Vec<String>,
}

#[derive(Clone, Debug, Default, Serialize)]
pub struct GenerationReport {
    pub topic: String,
    pub requested: usize,
    pub prompts: usize,
    pub generated: usize,
    pub failed: usize,
}

pub fn opening_message(topic: &str, num: usize, batch_size: usize) -> String {
    format!(
        r#"You are an expert prompt engineer. Your task is to generate a total of {num} highly creative and detailed image prompts for the topic: '{topic}'.
Include keywords like "4k", "high resolution", "photorealistic", "cinematic lighting", "epic scale".

The rules for our interaction are as follows:
1. You MUST provide the prompts in batches. Each batch must contain exactly {batch_size} prompts.
2. After providing a batch, you MUST stop and wait for me to say "next".
3. When I say "next", you will provide the next batch of {batch_size} new prompts, ensuring there are no duplicates from previous batches.
4. Continue this process until you have delivered the total of {num} prompts.
5. After the final batch is delivered (meaning the total has reached or exceeded {num}), the next time I say "next", you MUST respond ONLY with a JSON object containing an empty list: {{"items": []}}. This is the signal for me that the task is complete.

Now, provide the first batch of {batch_size} prompts.
"#
    )
}

/// Ask `session` for `num` prompts about `topic`, `batch_size` at a time.
///
/// Stops at `num`, on an empty batch, or on a reply that is not a batch; in the
/// last two cases whatever was collected so far is returned. A failing first
/// turn is an error, a failing later turn ends the conversation early.
pub fn collect_prompts(
    session: &mut dyn PromptSession,
    topic: &str,
    num: usize,
    batch_size: usize,
) -> Result<Vec<String>> {
    let mut prompts = Vec::with_capacity(num);
    if num == 0 {
        return Ok(prompts);
    }

    let mut reply = session
        .send(&opening_message(topic, num, batch_size.max(1)))
        .context("start prompt session")?;
    let mut remaining = num;
    loop {
        let batch = match serde_json::from_str::<PromptBatch>(&reply) {
            Ok(b) => b,
            Err(err) => {
                tracing::error!(error = %err, reply = %reply, "prompt reply is not a batch");
                break;
            }
        };
        if batch.items.is_empty() {
            if remaining > 0 {
                tracing::warn!(collected = prompts.len(), requested = num, "prompt session finished early");
            }
            break;
        }

        let take = batch.items.len().min(remaining);
        prompts.extend(batch.items.into_iter().take(take));
        remaining -= take;
        tracing::info!(collected = prompts.len(), requested = num, "prompt batch received");
        if remaining == 0 {
            break;
        }

        reply = match session.send("next") {
            Ok(r) => r,
            Err(err) => {
                tracing::error!(error = %format!("{:#}", err), "prompt session failed, keeping what was collected");
                break;
            }
        };
    }
    Ok(prompts)
}

/// Generate `num` wallpapers for `topic` with the configured collaborators.
pub fn run(config: &Config, catalog: &CatalogStore, topic: &str, num: usize) -> Result<GenerationReport> {
    let generator = &config.generator;
    let mut session = GenAiSession::new(generator)?;
    let images = WallpaperClient::new(generator, &config.data.blob_dir_path())?;
    run_with(
        &mut session,
        &images,
        catalog,
        topic,
        num,
        generator.prompt_batch_size,
        (generator.width, generator.height),
    )
}

/// `run` over explicit collaborators.
pub fn run_with(
    session: &mut dyn PromptSession,
    images: &dyn WallpaperSource,
    catalog: &CatalogStore,
    topic: &str,
    num: usize,
    batch_size: usize,
    (width, height): (u32, u32),
) -> Result<GenerationReport> {
    let topic = topic.trim();
    if topic.is_empty() {
        anyhow::bail!("topic name must not be empty");
    }
    tracing::info!(topic, num, batch_size, "generating wallpapers");

    let prompts = collect_prompts(session, topic, num, batch_size)?;
    if prompts.is_empty() {
        anyhow::bail!("no prompts were produced for topic {}", topic);
    }
    let topic_id = catalog.ensure_topic(topic)?;

    let mut report = GenerationReport {
        topic: topic.to_string(),
        requested: num,
        prompts: prompts.len(),
        ..Default::default()
    };
    for (i, prompt) in prompts.iter().enumerate() {
        let generated = match images.generate(prompt, width, height) {
            Ok(g) => g,
            Err(err) => {
                tracing::error!(index = i + 1, prompt = %short(prompt), error = %format!("{:#}", err), "wallpaper generation failed");
                report.failed += 1;
                continue;
            }
        };
        catalog.insert_image(&NewImage {
            topic_id,
            image: generated.filename.clone(),
            prompt: prompt.clone(),
            width: Some(i64::from(width)),
            height: Some(i64::from(height)),
            seed: Some(generated.seed),
            ..Default::default()
        })?;
        report.generated += 1;
        tracing::info!(index = i + 1, total = prompts.len(), image = %generated.filename, "wallpaper stored");
    }
    tracing::info!(generated = report.generated, attempted = report.prompts, "generation finished");
    Ok(report)
}

fn short(prompt: &str) -> String {
    prompt.chars().take(50).collect()
}

#[cfg(test)]
#[path = "tests/generate_tests.rs"]
mod tests;
