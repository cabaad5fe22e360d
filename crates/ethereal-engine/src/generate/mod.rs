//! Image generation fallback chain.
//!
//! Sources are tried strictly in order. URL candidates must survive a
//! preload before they count; the first success wins and every attempt is
//! kept for reporting.

mod probe;
mod sources;

use std::sync::Arc;
use std::time::Duration;

use ethereal_contracts::events::ActivityLog;
use ethereal_contracts::providers::{NamedProvider, ProviderRegistry};
use rand::Rng;
use reqwest::blocking::Client as HttpClient;
use serde::Serialize;
use serde_json::json;

use crate::config::StudioConfig;
use crate::map_object;

pub use probe::{HttpImageProbe, ImageProbe, ProbeError, ProbeHit, ProbeMode};
pub(crate) use probe::{decode_data_uri, sniff_image};
pub use sources::{
    default_sources, Candidate, HuggingFaceClient, HuggingFaceSource, ImageSource, OpenAiSource,
    PublicSource, SourceContext, StabilitySource, PLACEHOLDER_COLORS, POLLINATIONS_IMAGE_BASE,
};

pub const PROMPT_ENHANCEMENT_SUFFIX: &str =
    ", digital art, high quality, detailed, vibrant colors, professional composition, masterpiece";
const SEED_RANGE: u64 = 1_000_000;

pub fn enhanced_prompt(prompt: &str) -> String {
    format!("{prompt}{PROMPT_ENHANCEMENT_SUFFIX}")
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerationRequest {
    pub prompt: String,
    pub width: u32,
    pub height: u32,
    /// Pins the seed for every candidate instead of drawing a fresh one.
    pub seed: Option<u64>,
}

impl GenerationRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            width: crate::config::DEFAULT_IMAGE_SIZE,
            height: crate::config::DEFAULT_IMAGE_SIZE,
            seed: None,
        }
    }

    pub fn with_size(mut self, width: u32, height: u32) -> Self {
        self.width = width;
        self.height = height;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Attempt {
    pub source: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Attempt {
    pub fn succeeded(&self) -> bool {
        self.error.is_none()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GenerationOutcome {
    pub image_url: String,
    pub source: String,
    pub attempts: Vec<Attempt>,
}

#[derive(Debug, thiserror::Error)]
pub enum GenerationError {
    #[error("prompt is empty")]
    EmptyPrompt,
    #[error("All image generation services failed")]
    AllSourcesFailed { attempts: Vec<Attempt> },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProbeTimeouts {
    pub first: Duration,
    pub retry: Duration,
}

impl Default for ProbeTimeouts {
    fn default() -> Self {
        Self {
            first: Duration::from_millis(15_000),
            retry: Duration::from_millis(10_000),
        }
    }
}

pub struct ImageSequencer {
    sources: ProviderRegistry<Box<dyn ImageSource>>,
    probe: Arc<dyn ImageProbe>,
    timeouts: ProbeTimeouts,
    activity: ActivityLog,
}

impl ImageSequencer {
    pub fn new(sources: Vec<Box<dyn ImageSource>>, probe: Arc<dyn ImageProbe>) -> Self {
        Self {
            sources: ProviderRegistry::new(sources),
            probe,
            timeouts: ProbeTimeouts::default(),
            activity: ActivityLog::disabled(),
        }
    }

    pub fn from_config(config: &StudioConfig, http: &HttpClient, probe: Arc<dyn ImageProbe>) -> Self {
        Self::new(default_sources(config, http), probe).with_timeouts(ProbeTimeouts {
            first: config.probe_timeout,
            retry: config.retry_timeout,
        })
    }

    pub fn with_timeouts(mut self, timeouts: ProbeTimeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    pub fn with_activity(mut self, activity: ActivityLog) -> Self {
        self.activity = activity;
        self
    }

    pub fn source_names(&self) -> Vec<String> {
        self.sources.names_in_order()
    }

    pub fn probe(&self) -> Arc<dyn ImageProbe> {
        Arc::clone(&self.probe)
    }

    pub fn generate(&self, request: &GenerationRequest) -> Result<GenerationOutcome, GenerationError> {
        let prompt = request.prompt.trim();
        if prompt.is_empty() {
            return Err(GenerationError::EmptyPrompt);
        }
        let enhanced = enhanced_prompt(prompt);
        let mut attempts: Vec<Attempt> = Vec::new();

        for source in self.sources.providers() {
            let seed = request
                .seed
                .unwrap_or_else(|| rand::thread_rng().gen_range(0..SEED_RANGE));
            let context = SourceContext {
                prompt,
                enhanced: &enhanced,
                width: request.width,
                height: request.height,
                seed,
            };
            let name = source.name().to_string();
            let attempt = self.attempt(source.as_ref(), &context);
            self.activity.record(
                "generation_attempt",
                map_object(json!({
                    "source": name,
                    "url": attempt.url,
                    "error": attempt.error,
                })),
            );

            if let (None, Some(url)) = (&attempt.error, &attempt.url) {
                let image_url = url.clone();
                tracing::info!(source = %name, attempts = attempts.len() + 1, "image generated");
                attempts.push(attempt);
                self.activity.record(
                    "generation_succeeded",
                    map_object(json!({
                        "source": name,
                        "image_url": image_url,
                        "attempts": attempts.len(),
                    })),
                );
                return Ok(GenerationOutcome {
                    image_url,
                    source: name,
                    attempts,
                });
            }
            tracing::warn!(
                source = %name,
                error = attempt.error.as_deref().unwrap_or_default(),
                "image source failed, trying next"
            );
            attempts.push(attempt);
        }

        tracing::error!(attempts = attempts.len(), "all image generation services failed");
        self.activity.record(
            "generation_failed",
            map_object(json!({
                "prompt": prompt,
                "attempts": attempts,
            })),
        );
        Err(GenerationError::AllSourcesFailed { attempts })
    }

    fn attempt(&self, source: &dyn ImageSource, context: &SourceContext<'_>) -> Attempt {
        let name = source.name().to_string();
        match source.candidate(context) {
            Ok(Candidate::Ready(url)) => Attempt {
                source: name,
                url: Some(url),
                error: None,
            },
            Ok(Candidate::Probe(url)) => {
                tracing::debug!(source = %name, url = %url, "preloading candidate");
                let error = self.preload(&url).err().map(|err| err.to_string());
                Attempt {
                    source: name,
                    url: Some(url),
                    error,
                }
            }
            Err(err) => Attempt {
                source: name,
                url: None,
                error: Some(crate::error_chain_text(&err, 400)),
            },
        }
    }

    /// Anonymous load first; a load error (not a timeout) earns one relaxed retry.
    fn preload(&self, url: &str) -> Result<ProbeHit, ProbeError> {
        match self.probe.probe(url, ProbeMode::Anonymous, self.timeouts.first) {
            Ok(hit) => Ok(hit),
            Err(err) if err.is_timeout() => Err(err),
            Err(err) => {
                tracing::debug!(url, error = %err, "retrying without cross-origin mode");
                self.probe.probe(url, ProbeMode::Relaxed, self.timeouts.retry)
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::collections::BTreeMap;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use anyhow::bail;
    use ethereal_contracts::providers::NamedProvider;

    use super::probe::tests::{local_client, ImageHost};
    use super::{
        Candidate, GenerationError, GenerationRequest, HttpImageProbe, ImageProbe, ImageSequencer,
        ImageSource, ProbeError, ProbeHit, ProbeMode, ProbeTimeouts, SourceContext,
        PROMPT_ENHANCEMENT_SUFFIX,
    };

    /// Probe double: answers per URL prefix and records every call.
    #[derive(Default)]
    pub(crate) struct ScriptedProbe {
        pub outcomes: BTreeMap<String, Vec<Result<(), ProbeError>>>,
        pub calls: Mutex<Vec<(String, ProbeMode)>>,
    }

    impl ScriptedProbe {
        pub fn answer(mut self, prefix: &str, outcomes: Vec<Result<(), ProbeError>>) -> Self {
            self.outcomes.insert(prefix.to_string(), outcomes);
            self
        }

        pub fn calls(&self) -> Vec<(String, ProbeMode)> {
            self.calls
                .lock()
                .map(|calls| calls.clone())
                .unwrap_or_default()
        }
    }

    impl ImageProbe for ScriptedProbe {
        fn probe(&self, url: &str, mode: ProbeMode, _timeout: Duration) -> Result<ProbeHit, ProbeError> {
            let call_index = {
                let mut calls = self.calls.lock().map_err(|_| ProbeError::failed(url, "poisoned"))?;
                let index = calls.iter().filter(|(seen, _)| seen == url).count();
                calls.push((url.to_string(), mode));
                index
            };
            let scripted = self
                .outcomes
                .iter()
                .find(|(prefix, _)| url.starts_with(prefix.as_str()))
                .and_then(|(_, outcomes)| outcomes.get(call_index).cloned());
            match scripted {
                Some(Ok(())) => Ok(ProbeHit {
                    format: "png".to_string(),
                    dimensions: Some((1, 1)),
                }),
                Some(Err(err)) => Err(err),
                None => Err(ProbeError::failed(url, "unscripted")),
            }
        }
    }

    struct FixedSource {
        name: &'static str,
        result: Result<Candidate, &'static str>,
    }

    impl NamedProvider for FixedSource {
        fn name(&self) -> &str {
            self.name
        }
    }

    impl ImageSource for FixedSource {
        fn candidate(&self, _context: &SourceContext<'_>) -> anyhow::Result<Candidate> {
            match &self.result {
                Ok(candidate) => Ok(candidate.clone()),
                Err(message) => bail!("{message}"),
            }
        }
    }

    fn probe_source(name: &'static str, url: &str) -> Box<dyn ImageSource> {
        Box::new(FixedSource {
            name,
            result: Ok(Candidate::Probe(url.to_string())),
        })
    }

    fn failed(url: &str) -> ProbeError {
        ProbeError::failed(url, "load error")
    }

    fn timeout(url: &str) -> ProbeError {
        ProbeError::Timeout {
            url: url.to_string(),
            after: Duration::from_millis(1),
        }
    }

    #[test]
    fn empty_prompt_is_rejected_without_requests() {
        let probe = Arc::new(ScriptedProbe::default());
        let sequencer = ImageSequencer::new(vec![probe_source("a", "https://a/1")], probe.clone());
        let result = sequencer.generate(&GenerationRequest::new("   "));
        assert!(matches!(result, Err(GenerationError::EmptyPrompt)));
        assert!(probe.calls().is_empty());
    }

    #[test]
    fn first_successful_source_wins() -> anyhow::Result<()> {
        let probe = Arc::new(
            ScriptedProbe::default()
                .answer("https://a/", vec![Err(failed("a")), Err(failed("a"))])
                .answer("https://b/", vec![Ok(())]),
        );
        let sequencer = ImageSequencer::new(
            vec![
                probe_source("a", "https://a/1"),
                probe_source("b", "https://b/1"),
                probe_source("c", "https://c/1"),
            ],
            probe.clone(),
        );

        let outcome = sequencer.generate(&GenerationRequest::new("sunset"))?;
        assert_eq!(outcome.image_url, "https://b/1");
        assert_eq!(outcome.source, "b");
        assert_eq!(outcome.attempts.len(), 2);
        assert!(!outcome.attempts[0].succeeded());
        assert!(probe.calls().iter().all(|(url, _)| !url.starts_with("https://c/")));
        Ok(())
    }

    #[test]
    fn error_retries_relaxed_but_timeout_does_not() -> anyhow::Result<()> {
        let probe = Arc::new(
            ScriptedProbe::default()
                .answer("https://slow/", vec![Err(timeout("slow"))])
                .answer("https://cors/", vec![Err(failed("cors")), Ok(())]),
        );
        let sequencer = ImageSequencer::new(
            vec![
                probe_source("slow", "https://slow/1"),
                probe_source("cors", "https://cors/1"),
            ],
            probe.clone(),
        );

        let outcome = sequencer.generate(&GenerationRequest::new("ocean"))?;
        assert_eq!(outcome.source, "cors");
        assert_eq!(
            probe.calls(),
            vec![
                ("https://slow/1".to_string(), ProbeMode::Anonymous),
                ("https://cors/1".to_string(), ProbeMode::Anonymous),
                ("https://cors/1".to_string(), ProbeMode::Relaxed),
            ]
        );
        Ok(())
    }

    #[test]
    fn exhausts_every_source_before_failing() {
        let probe = Arc::new(ScriptedProbe::default());
        let sources: Vec<Box<dyn ImageSource>> = vec![
            Box::new(FixedSource {
                name: "keyed",
                result: Err("401 unauthorized"),
            }),
            probe_source("a", "https://a/1"),
            probe_source("b", "https://b/1"),
        ];
        let sequencer = ImageSequencer::new(sources, probe);

        match sequencer.generate(&GenerationRequest::new("sunset")) {
            Err(GenerationError::AllSourcesFailed { attempts }) => {
                let names: Vec<&str> = attempts.iter().map(|attempt| attempt.source.as_str()).collect();
                assert_eq!(names, vec!["keyed", "a", "b"]);
                assert!(attempts.iter().all(|attempt| attempt.error.is_some()));
            }
            other => panic!("expected AllSourcesFailed, got {other:?}"),
        }
    }

    #[test]
    fn ready_candidates_skip_the_preload() -> anyhow::Result<()> {
        let probe = Arc::new(ScriptedProbe::default());
        let sequencer = ImageSequencer::new(
            vec![Box::new(FixedSource {
                name: "keyed",
                result: Ok(Candidate::Ready("data:image/png;base64,AAAA".to_string())),
            })],
            probe.clone(),
        );
        let outcome = sequencer.generate(&GenerationRequest::new("cat"))?;
        assert_eq!(outcome.image_url, "data:image/png;base64,AAAA");
        assert!(probe.calls().is_empty());
        Ok(())
    }

    struct EchoSource;

    impl NamedProvider for EchoSource {
        fn name(&self) -> &str {
            "echo"
        }
    }

    impl ImageSource for EchoSource {
        fn candidate(&self, context: &SourceContext<'_>) -> anyhow::Result<Candidate> {
            Ok(Candidate::Ready(format!(
                "{}|{}|{}",
                context.prompt, context.enhanced, context.seed
            )))
        }
    }

    #[test]
    fn sources_see_trimmed_and_enhanced_prompts() -> anyhow::Result<()> {
        let sequencer = ImageSequencer::new(vec![Box::new(EchoSource)], Arc::new(ScriptedProbe::default()));
        let outcome = sequencer.generate(&GenerationRequest::new("  fox ").with_seed(7))?;
        assert_eq!(
            outcome.image_url,
            format!("fox|fox{PROMPT_ENHANCEMENT_SUFFIX}|7")
        );
        Ok(())
    }

    #[test]
    fn live_host_gets_relaxed_retry_after_cors_failure() -> anyhow::Result<()> {
        let host = ImageHost::start()?;
        let probe = Arc::new(HttpImageProbe::with_client(local_client()?));
        let sequencer = ImageSequencer::new(
            vec![
                probe_source("html", &host.url("/page")),
                probe_source("no-cors", &host.url("/plain.png")),
                probe_source("never", &host.url("/cors.png")),
            ],
            probe,
        )
        .with_timeouts(ProbeTimeouts {
            first: Duration::from_secs(5),
            retry: Duration::from_secs(5),
        });

        let outcome = sequencer.generate(&GenerationRequest::new("cat"))?;

        assert_eq!(outcome.source, "no-cors");
        assert_eq!(outcome.image_url, host.url("/plain.png"));
        assert_eq!(outcome.attempts.len(), 2);
        assert!(outcome.attempts[0]
            .error
            .as_deref()
            .is_some_and(|error| error.contains("not an image")));
        assert!(outcome.attempts[1].succeeded());
        Ok(())
    }
}
