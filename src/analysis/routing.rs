//! Task-to-model routing
//!
//! Each analytical task is bound to a named model by a static table; a
//! task absent from the table falls back to the default route. Routes
//! carry the provider endpoint, the environment variable holding the API
//! key, and a rationale for the choice.

use std::collections::HashMap;

use lazy_static::lazy_static;

/// One task's model binding
#[derive(Debug, Clone)]
pub struct TaskRoute {
    pub model: &'static str,
    pub base_url: &'static str,
    pub api_key_env: &'static str,
    pub reason: &'static str,
}

impl TaskRoute {
    /// Extra headers some aggregator endpoints require for attribution
    pub fn extra_headers(&self) -> Vec<(&'static str, &'static str)> {
        if self.base_url.contains("openrouter") {
            vec![
                ("HTTP-Referer", "https://parley.dev"),
                ("X-Title", "Parley"),
            ]
        } else {
            Vec::new()
        }
    }

    /// Resolve the API key from the configured environment variable
    pub fn api_key(&self) -> crate::error::Result<String> {
        std::env::var(self.api_key_env).map_err(|_| {
            crate::error::Error::Configuration(format!("{} not set", self.api_key_env))
        })
    }
}

const DEFAULT_ROUTE: TaskRoute = TaskRoute {
    model: "deepseek/deepseek-chat",
    base_url: "https://openrouter.ai/api/v1",
    api_key_env: "OPENROUTER_API_KEY",
    reason: "Cost-effective default for unrouted tasks",
};

lazy_static! {
    static ref TASK_ROUTES: HashMap<&'static str, TaskRoute> = {
        let mut routes = HashMap::new();

        routes.insert(
            "customer_extraction",
            TaskRoute {
                model: "anthropic/claude-3-haiku",
                base_url: "https://openrouter.ai/api/v1",
                api_key_env: "OPENROUTER_API_KEY",
                reason: "Strong structured extraction and name recognition",
            },
        );
        routes.insert(
            "sentiment_analysis",
            TaskRoute {
                model: "deepseek/deepseek-chat",
                base_url: "https://openrouter.ai/api/v1",
                api_key_env: "OPENROUTER_API_KEY",
                reason: "Cost-effective with good emotional understanding",
            },
        );
        routes.insert(
            "business_insights",
            TaskRoute {
                model: "openai/gpt-4-turbo",
                base_url: "https://openrouter.ai/api/v1",
                api_key_env: "OPENROUTER_API_KEY",
                reason: "Complex business analysis and strategic insight",
            },
        );
        routes.insert(
            "support_analysis",
            TaskRoute {
                model: "meta-llama/llama-3.1-70b-instruct",
                base_url: "https://openrouter.ai/api/v1",
                api_key_env: "OPENROUTER_API_KEY",
                reason: "Good technical problem classification",
            },
        );
        routes.insert(
            "sales_analysis",
            TaskRoute {
                model: "anthropic/claude-3-sonnet-20240229",
                base_url: "https://openrouter.ai/api/v1",
                api_key_env: "OPENROUTER_API_KEY",
                reason: "Balances cost and sales insight quality",
            },
        );
        routes.insert(
            "summarization",
            TaskRoute {
                model: "deepseek/deepseek-chat",
                base_url: "https://openrouter.ai/api/v1",
                api_key_env: "OPENROUTER_API_KEY",
                reason: "Good summaries at low cost",
            },
        );
        routes.insert(
            "call_classification",
            TaskRoute {
                model: "openai/gpt-3.5-turbo",
                base_url: "https://openrouter.ai/api/v1",
                api_key_env: "OPENROUTER_API_KEY",
                reason: "Reliable classification at reasonable cost",
            },
        );

        routes
    };
}

/// Route for a task, or the default when unlisted
pub fn route_for(task: &str) -> TaskRoute {
    TASK_ROUTES.get(task).cloned().unwrap_or(DEFAULT_ROUTE)
}

/// All known task names (for the CLI surface)
pub fn known_tasks() -> Vec<&'static str> {
    let mut tasks: Vec<_> = TASK_ROUTES.keys().copied().collect();
    tasks.sort_unstable();
    tasks
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_task_routes() {
        let route = route_for("customer_extraction");
        assert_eq!(route.model, "anthropic/claude-3-haiku");
        assert_eq!(route.api_key_env, "OPENROUTER_API_KEY");
    }

    #[test]
    fn test_unknown_task_falls_back_to_default() {
        let route = route_for("no_such_task");
        assert_eq!(route.model, DEFAULT_ROUTE.model);
    }

    #[test]
    fn test_openrouter_routes_carry_attribution_headers() {
        let route = route_for("sentiment_analysis");
        let headers = route.extra_headers();
        assert!(headers.iter().any(|(k, _)| *k == "HTTP-Referer"));
        assert!(headers.iter().any(|(k, _)| *k == "X-Title"));
    }

    #[test]
    fn test_direct_endpoints_skip_attribution_headers() {
        let route = TaskRoute {
            model: "gpt-4o",
            base_url: "https://api.openai.com/v1",
            api_key_env: "OPENAI_API_KEY",
            reason: "test",
        };
        assert!(route.extra_headers().is_empty());
    }
}
