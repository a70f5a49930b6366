// Integration tests for router construction: plugin scoping, teardown and build failures
#[cfg(test)]
mod tests {
    use std::{
        collections::BTreeMap,
        sync::{Arc, Mutex},
    };

    use async_trait::async_trait;
    use axum::body::Body;
    use http::{Request, StatusCode, header::ACCEPT};
    use http_body_util::BodyExt;
    use rampart::{
        BuildError, PluginRegistry, Router,
        config::models::{NamespaceConfig, PluginRef, RouteConfig},
        ports::{
            handler::{SharedHandler, handler_fn},
            plugin::{
                Capabilities, Capability, Factory, InjectionContext, Middleware, Plugin,
                PluginConfig,
            },
            problem::{BoxError, HandlerError, HttpError},
        },
    };
    use serde_json::json;

    /// Ordered record of plugin lifecycle events.
    #[derive(Default)]
    struct Journal {
        events: Mutex<Vec<String>>,
    }

    impl Journal {
        fn record(&self, event: String) {
            self.events.lock().unwrap().push(event);
        }

        fn count(&self, event: &str) -> usize {
            self.events
                .lock()
                .unwrap()
                .iter()
                .filter(|e| e.as_str() == event)
                .count()
        }
    }

    /// Factory for a middleware plugin driven by its config:
    /// `fail_setup`, `fail_teardown` and `status` (short-circuit with that status).
    struct Recording {
        name: String,
        journal: Arc<Journal>,
    }

    struct RecordingInstance {
        name: String,
        journal: Arc<Journal>,
        status: Mutex<Option<StatusCode>>,
        fail_teardown: Mutex<bool>,
    }

    #[async_trait]
    impl Factory for Recording {
        fn name(&self) -> &str {
            &self.name
        }

        async fn create(&self, _ictx: &InjectionContext) -> Result<Arc<dyn Plugin>, BoxError> {
            self.journal.record(format!("create {}", self.name));
            Ok(Arc::new(RecordingInstance {
                name: self.name.clone(),
                journal: self.journal.clone(),
                status: Mutex::new(None),
                fail_teardown: Mutex::new(false),
            }))
        }
    }

    #[async_trait]
    impl Plugin for RecordingInstance {
        async fn setup(&self, _ictx: &InjectionContext, config: &PluginConfig) -> Result<(), BoxError> {
            self.journal.record(format!("setup {}", self.name));
            *self.fail_teardown.lock().unwrap() = config
                .get("fail_teardown")
                .and_then(|v| v.as_bool())
                .unwrap_or(false);
            if config.get("fail_setup").and_then(|v| v.as_bool()) == Some(true) {
                return Err(format!("{} refused its config", self.name).into());
            }
            if let Some(status) = config.get("status").and_then(|v| v.as_u64()) {
                *self.status.lock().unwrap() = Some(StatusCode::from_u16(status as u16)?);
            }
            Ok(())
        }

        async fn teardown(&self) -> Result<(), BoxError> {
            self.journal.record(format!("teardown {}", self.name));
            if *self.fail_teardown.lock().unwrap() {
                return Err("teardown exploded".into());
            }
            Ok(())
        }

        fn capabilities(self: Arc<Self>) -> Capabilities {
            Capabilities::new().with_middleware(self)
        }
    }

    impl Middleware for RecordingInstance {
        fn handler(&self, next: SharedHandler) -> SharedHandler {
            match *self.status.lock().unwrap() {
                Some(status) => handler_fn(move |_req| async move {
                    Err(HandlerError::from(HttpError::new(status)))
                }),
                None => next,
            }
        }
    }

    fn registry(journal: &Arc<Journal>, names: &[&str]) -> Arc<PluginRegistry> {
        let mut registry = PluginRegistry::with_builtins();
        for name in names {
            registry.register(Recording {
                name: name.to_string(),
                journal: journal.clone(),
            });
        }
        Arc::new(registry)
    }

    fn route(middlewares: Vec<PluginRef>) -> RouteConfig {
        RouteConfig {
            middlewares,
            ..Default::default()
        }
    }

    async fn build_err(
        namespaces: &BTreeMap<String, NamespaceConfig>,
        registry: Arc<PluginRegistry>,
    ) -> BuildError {
        match Router::build(namespaces, registry).await {
            Ok(_) => panic!("build should fail"),
            Err(err) => err,
        }
    }

    async fn body_text(response: http::Response<Body>) -> String {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_scoped_instance_reuse() {
        let journal = Arc::new(Journal::default());
        let mut routes = BTreeMap::new();
        routes.insert("/x".to_string(), route(vec![PluginRef::new("per-route")]));
        routes.insert("/y".to_string(), route(vec![PluginRef::new("per-route")]));

        let mut namespaces = BTreeMap::new();
        namespaces.insert(
            "svc".to_string(),
            NamespaceConfig {
                mounts: vec!["/a".to_string(), "/b".to_string()],
                hooks: vec![PluginRef::new("shared")],
                middlewares: vec![PluginRef::new("shared"), PluginRef::new("shared")],
                routes,
                ..Default::default()
            },
        );

        let router = Router::build(&namespaces, registry(&journal, &["shared", "per-route"]))
            .await
            .unwrap();
        assert_eq!(router.mux().len(), 4);
        assert_eq!(journal.count("create shared"), 1);
        assert_eq!(journal.count("setup shared"), 1);
        assert_eq!(journal.count("create per-route"), 4);

        router.shutdown().await.unwrap();
        assert_eq!(journal.count("teardown shared"), 1);
        assert_eq!(journal.count("teardown per-route"), 4);

        // a second shutdown has nothing left to run
        router.shutdown().await.unwrap();
        assert_eq!(journal.count("teardown shared"), 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_setup_failure_tears_down_earlier_plugins() {
        let journal = Arc::new(Journal::default());
        let names = ["p1", "p2", "p3", "p4", "p5"];
        let middlewares = names
            .iter()
            .map(|name| {
                let plugin = PluginRef::new(*name);
                if *name == "p3" {
                    plugin.with_config(json!({ "fail_setup": true }))
                } else {
                    plugin
                }
            })
            .collect();

        let mut namespaces = BTreeMap::new();
        namespaces.insert(
            "svc".to_string(),
            NamespaceConfig {
                middlewares,
                ..Default::default()
            },
        );

        let err = build_err(&namespaces, registry(&journal, &names)).await;
        assert!(
            matches!(err.root(), BuildError::PluginSetup { plugin, .. } if plugin == "p3"),
            "{err}"
        );
        assert!(err.to_string().contains("p3 refused its config"));

        assert_eq!(journal.count("teardown p1"), 1);
        assert_eq!(journal.count("teardown p2"), 1);
        assert_eq!(journal.count("create p4"), 0);
        assert_eq!(journal.count("create p5"), 0);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_failing_teardown_is_joined() {
        let journal = Arc::new(Journal::default());
        let mut namespaces = BTreeMap::new();
        namespaces.insert(
            "svc".to_string(),
            NamespaceConfig {
                middlewares: vec![
                    PluginRef::new("leaky").with_config(json!({ "fail_teardown": true })),
                    PluginRef::new("broken").with_config(json!({ "fail_setup": true })),
                ],
                ..Default::default()
            },
        );

        let err = build_err(&namespaces, registry(&journal, &["leaky", "broken"])).await;
        let BuildError::Namespace { source, .. } = &err else {
            panic!("expected a namespace error, got {err}");
        };
        assert!(matches!(**source, BuildError::Joined { .. }), "{err}");
        assert!(matches!(err.root(), BuildError::PluginSetup { .. }));
        let message = err.to_string();
        assert!(message.contains("broken refused its config"));
        assert!(message.contains("teardown exploded"));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_failed_namespace_tears_down_earlier_namespaces() {
        let journal = Arc::new(Journal::default());
        let mut namespaces = BTreeMap::new();
        namespaces.insert(
            "alpha".to_string(),
            NamespaceConfig {
                middlewares: vec![PluginRef::new("ok")],
                routes: BTreeMap::from([("/".to_string(), RouteConfig::default())]),
                ..Default::default()
            },
        );
        namespaces.insert(
            "beta".to_string(),
            NamespaceConfig {
                middlewares: vec![PluginRef::new("missing")],
                ..Default::default()
            },
        );

        let err = build_err(&namespaces, registry(&journal, &["ok"])).await;
        assert!(matches!(err, BuildError::Namespace { ref namespace, .. } if namespace == "beta"));
        assert!(matches!(err.root(), BuildError::PluginNotFound { name } if name == "missing"));
        assert_eq!(journal.count("teardown ok"), 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_missing_capability() {
        let journal = Arc::new(Journal::default());
        let mut namespaces = BTreeMap::new();
        namespaces.insert(
            "svc".to_string(),
            NamespaceConfig {
                routes: BTreeMap::from([(
                    "/".to_string(),
                    RouteConfig {
                        request_modifiers: vec![PluginRef::new("recorder")],
                        ..Default::default()
                    },
                )]),
                ..Default::default()
            },
        );

        let err = build_err(&namespaces, registry(&journal, &["recorder"])).await;
        assert!(matches!(
            err.root(),
            BuildError::MissingCapability {
                capability: Capability::RequestModifier,
                ..
            }
        ));
        assert!(err.to_string().contains("is not a request modifier"));
        assert_eq!(journal.count("teardown recorder"), 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_impossible_route() {
        let mut namespaces = BTreeMap::new();
        namespaces.insert(
            "svc".to_string(),
            NamespaceConfig {
                mounts: vec!["GET /a".to_string()],
                routes: BTreeMap::from([("POST /b".to_string(), RouteConfig::default())]),
                ..Default::default()
            },
        );

        let err = build_err(&namespaces, Arc::new(PluginRegistry::new())).await;
        assert!(matches!(err.root(), BuildError::ImpossibleRoute(_)));
        assert!(err.to_string().contains("method mismatch"));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_duplicate_pattern_across_namespaces() {
        let mut namespaces = BTreeMap::new();
        for name in ["first", "second"] {
            namespaces.insert(
                name.to_string(),
                NamespaceConfig {
                    routes: BTreeMap::from([("/shared".to_string(), RouteConfig::default())]),
                    ..Default::default()
                },
            );
        }

        let err = build_err(&namespaces, Arc::new(PluginRegistry::new())).await;
        assert!(matches!(err.root(), BuildError::PatternConflict { .. }), "{err}");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_overlapping_wildcards_across_namespaces() {
        let mut namespaces = BTreeMap::new();
        for (name, pattern) in [("first", "/a/{x}"), ("second", "/{y}/b")] {
            namespaces.insert(
                name.to_string(),
                NamespaceConfig {
                    routes: BTreeMap::from([(pattern.to_string(), RouteConfig::default())]),
                    ..Default::default()
                },
            );
        }

        let err = build_err(&namespaces, Arc::new(PluginRegistry::new())).await;
        assert!(
            matches!(err, BuildError::Namespace { ref namespace, .. } if namespace == "second"),
            "{err}"
        );
        assert!(
            matches!(
                err.root(),
                BuildError::PatternConflict { pattern, existing }
                    if pattern == "/{y}/b" && existing == "/a/{x}"
            ),
            "{err}"
        );
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_middleware_error_reaches_error_handler() {
        let journal = Arc::new(Journal::default());
        let mut namespaces = BTreeMap::new();
        namespaces.insert(
            "limits".to_string(),
            NamespaceConfig {
                routes: BTreeMap::from([(
                    "GET /limited".to_string(),
                    route(vec![
                        PluginRef::new("limiter").with_config(json!({ "status": 429 })),
                    ]),
                )]),
                ..Default::default()
            },
        );
        let router = Router::build(&namespaces, registry(&journal, &["limiter"]))
            .await
            .unwrap();

        let response = router
            .serve(
                Request::builder()
                    .uri("/limited")
                    .body(Body::empty())
                    .unwrap(),
                None,
            )
            .await;
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(body_text(response).await, "Too Many Requests");

        let response = router
            .serve(
                Request::builder()
                    .uri("/limited")
                    .header(ACCEPT, "application/json")
                    .body(Body::empty())
                    .unwrap(),
                None,
            )
            .await;
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(
            body_text(response).await,
            "{\"title\":\"Too Many Requests\",\"status\":429}\n"
        );

        router.shutdown().await.unwrap();
    }
}
