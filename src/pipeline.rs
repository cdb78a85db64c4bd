use tracing::{error, info};

use crate::{
    extract::extract_html,
    gemini::GenerativeModel,
    models::{AnalysisResult, ConversionReport, CustomizationRequest, DesignImage, GenerationResult, StageResult},
    prompts::{build_analysis_prompt, build_synthesis_prompt},
};

/// Stage one: describe the design. Service failures become `Failure` with the service's message.
pub async fn analyze(model: &dyn GenerativeModel, image: &DesignImage, focus: Option<&str>) -> AnalysisResult {
    let prompt = build_analysis_prompt(focus);
    info!("🔍 Analyzing {}x{} design", image.width, image.height);
    match model.generate(&prompt, image).await {
        Ok(text) => {
            info!("✅ Analysis complete ({} chars)", text.len());
            StageResult::success(text)
        }
        Err(e) => {
            error!("❌ Analysis failed: {}", e);
            StageResult::failure(e.to_string())
        }
    }
}

/// Stage two: turn the analysis into a single HTML document.
pub async fn synthesize(
    model: &dyn GenerativeModel,
    analysis: &str,
    image: &DesignImage,
    custom: &CustomizationRequest,
) -> GenerationResult {
    let prompt = build_synthesis_prompt(analysis, custom);
    info!("💻 Generating HTML/CSS");
    match model.generate(&prompt, image).await {
        Ok(reply) => {
            let html = extract_html(&reply);
            info!("✅ Extracted {} chars of HTML from {} char reply", html.len(), reply.len());
            StageResult::success(html)
        }
        Err(e) => {
            error!("❌ Generation failed: {}", e);
            StageResult::failure(e.to_string())
        }
    }
}

/// Runs both stages in sequence; synthesis is skipped entirely when analysis fails.
pub async fn convert(model: &dyn GenerativeModel, image: &DesignImage, custom: &CustomizationRequest) -> ConversionReport {
    let analysis = match analyze(model, image, custom.focus()).await {
        StageResult::Success { value } => value,
        StageResult::Failure { message } => return ConversionReport::AnalysisFailed { message },
    };
    let generation = synthesize(model, &analysis, image, custom).await;
    ConversionReport::Analyzed { analysis, generation }
}
