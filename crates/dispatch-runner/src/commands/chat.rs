//! Chat command - sends one prompt and prints the answer.

use crate::error::AppResult;
use clap::Args;
use inference_client::{
    ChatRequest, InferenceClient, LocalImage, ReasoningEffort, DEFAULT_TEMPERATURE,
};
use std::path::PathBuf;

#[derive(Args, Debug)]
pub struct ChatArgs {
    /// Prompt text
    pub prompt: String,

    /// Remote image URL to attach (repeatable)
    #[arg(long = "image-url")]
    pub image_urls: Vec<String>,

    /// Local image file to attach (repeatable)
    #[arg(long = "image")]
    pub images: Vec<PathBuf>,

    /// Model id; defaults to the configured default model
    #[arg(long)]
    pub model: Option<String>,

    #[arg(long, default_value_t = DEFAULT_TEMPERATURE)]
    pub temperature: f32,

    /// Reasoning effort for reasoning models (low, medium, high)
    #[arg(long)]
    pub effort: Option<ReasoningEffort>,

    /// Print the raw response body instead of the extracted text
    #[arg(long)]
    pub raw: bool,
}

impl ChatArgs {
    pub fn to_request(&self) -> ChatRequest {
        let mut request = ChatRequest::new(self.prompt.clone()).with_temperature(self.temperature);

        if let Some(model) = &self.model {
            request = request.with_model(model.clone());
        }
        if let Some(effort) = self.effort {
            request = request.with_reasoning_effort(effort);
        }
        for url in &self.image_urls {
            request = request.with_image_url(url.clone());
        }
        for path in &self.images {
            request = request.with_local_image(LocalImage::Path(path.clone()));
        }

        request
    }
}

pub async fn run(args: &ChatArgs, client: &InferenceClient) -> AppResult<()> {
    let request = args.to_request();

    if args.raw {
        let completion = client.dispatch_verbose(&request).await?;
        println!("{}", serde_json::to_string_pretty(&completion.raw)?);
    } else {
        println!("{}", client.dispatch(&request).await?);
    }

    Ok(())
}
