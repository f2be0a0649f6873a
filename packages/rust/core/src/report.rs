//! The report step: collect sources for a link set, then write a report.

use std::sync::Arc;

use serde_json::{Value, json};
use tracing::{debug, info, instrument, warn};

use scholarflow_collector::{CollectResult, Collector};
use scholarflow_shared::{LinkSet, Result};

use crate::capability::GenerationCapability;
use crate::step::FunctionStep;

/// Turns `{"url_links": [...]}` into `{"report": ..., "url_links": [...]}`.
pub struct ReportMaker {
    capability: Arc<dyn GenerationCapability>,
    collector: Arc<Collector>,
    instruction: String,
    query: String,
}

impl ReportMaker {
    pub fn new(
        capability: Arc<dyn GenerationCapability>,
        collector: Arc<Collector>,
        instruction: impl Into<String>,
        query: impl Into<String>,
    ) -> Self {
        Self {
            capability,
            collector,
            instruction: instruction.into(),
            query: query.into(),
        }
    }

    /// Wrap as a suspending function step.
    pub fn into_step(self, name: impl Into<String>) -> FunctionStep {
        let maker = Arc::new(self);
        FunctionStep::suspending(name, move |payload| {
            let maker = Arc::clone(&maker);
            async move { maker.make(payload).await }
        })
    }

    #[instrument(skip_all)]
    pub async fn make(&self, payload: Value) -> Result<Value> {
        let query = payload
            .get("query")
            .and_then(Value::as_str)
            .filter(|q| !q.trim().is_empty())
            .unwrap_or(&self.query)
            .to_string();

        let links: LinkSet = serde_json::from_value(payload).unwrap_or_else(|e| {
            debug!(error = %e, "payload carries no usable link list");
            LinkSet::new()
        });

        let collected = if links.is_empty() {
            warn!("no links to collect, writing report without sources");
            CollectResult::default()
        } else {
            self.collector.collect(&links).await
        };

        info!(
            links = links.len(),
            sources = collected.sources.len(),
            errors = collected.errors.len(),
            "sources collected"
        );

        let prompt = self.render_prompt(&query, &collected);
        let report = self.capability.generate(&self.instruction, &[], &prompt).await?;

        Ok(json!({
            "report": report,
            "url_links": links.to_collection().url_links,
        }))
    }

    fn render_prompt(&self, query: &str, collected: &CollectResult) -> String {
        let max_chars = self.collector.config().max_source_chars;
        let mut prompt = format!("Query: {query}\n\n## Sources\n");

        if collected.sources.is_empty() {
            prompt.push_str("\nNo sources could be collected.\n");
        }
        for (i, source) in collected.sources.iter().enumerate() {
            let title = source.title.as_deref().unwrap_or(&source.url);
            let content: String = source.content.chars().take(max_chars).collect();
            prompt.push_str(&format!(
                "\n### [{}] {title}\nURL: {}\n\n{content}\n",
                i + 1,
                source.url
            ));
        }
        prompt
    }
}

#[cfg(test)]
mod tests {
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use scholarflow_shared::{CollectorConfig, StepResult};

    use super::*;
    use crate::capability::ScriptedCapability;
    use crate::step::NamedInputs;

    const ARTICLE: &str = "<html><head><title>Spin States</title></head><body>\
        <p>short</p>\
        <p>Iron(II) complexes switch between high-spin and low-spin states under pressure.</p>\
        </body></html>";

    fn collector(max_source_chars: usize) -> Arc<Collector> {
        let config = CollectorConfig {
            rate_limit_ms: 0,
            max_source_chars,
            ..CollectorConfig::default()
        };
        Arc::new(Collector::new(config).unwrap().allow_localhost())
    }

    #[tokio::test]
    async fn collects_sources_and_reports_links() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/article"))
            .respond_with(
                ResponseTemplate::new(200).set_body_raw(ARTICLE.as_bytes().to_vec(), "text/html"),
            )
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/gone"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let article = format!("{}/article", server.uri());
        let gone = format!("{}/gone", server.uri());
        let capability = Arc::new(ScriptedCapability::echo());
        let step = ReportMaker::new(capability.clone(), collector(4000), "write", "spin crossover")
            .into_step("report");

        let payload = StepResult::text(format!(r#"{{"url_links": ["{gone}", "{article}"]}}"#));
        let out = step.run(&payload, &NamedInputs::new()).await.unwrap();
        let value: Value = serde_json::from_str(&out.as_text()).unwrap();

        let report = value["report"].as_str().unwrap();
        assert!(report.starts_with("Query: spin crossover"));
        assert!(report.contains("### [1] Spin States"));
        assert!(report.contains("high-spin and low-spin"));
        assert!(!report.contains("short"));

        let mut expected = vec![article, gone];
        expected.sort();
        assert_eq!(value["url_links"], json!(expected));
        assert_eq!(capability.calls()[0].instruction, "write");
    }

    #[tokio::test]
    async fn sources_are_truncated() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200).set_body_raw(ARTICLE.as_bytes().to_vec(), "text/html"),
            )
            .mount(&server)
            .await;

        let maker = ReportMaker::new(Arc::new(ScriptedCapability::echo()), collector(8), "w", "q");
        let value = maker
            .make(json!({"url_links": [format!("{}/a", server.uri())]}))
            .await
            .unwrap();
        let report = value["report"].as_str().unwrap();
        assert!(report.contains("\n\nIron(II)\n"));
        assert!(!report.contains("complexes"));
    }

    #[tokio::test]
    async fn free_text_input_still_reports() {
        let step = ReportMaker::new(Arc::new(ScriptedCapability::echo()), collector(100), "w", "fallback query")
            .into_step("report");
        let out = step
            .run(&StepResult::text("no links here"), &NamedInputs::new())
            .await
            .unwrap();
        let value: Value = serde_json::from_str(&out.as_text()).unwrap();
        assert!(value["report"].as_str().unwrap().contains("fallback query"));
        assert!(value["report"].as_str().unwrap().contains("No sources could be collected."));
        assert_eq!(value["url_links"], json!([]));
    }
}
