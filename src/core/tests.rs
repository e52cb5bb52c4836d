//! Cross-component tests for a full synthesis run
//!
//! These drive `synthesize` end to end against the recording manifest.

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use crate::{
        config::{Config, RouteMode},
        core::{error::SynthError, traits::HandleOrigin},
        orchestration::{plan, synthesize, synthesize_with, FunctionState, SynthesisOptions},
        synth::Manifest,
    };

    fn init_log() {
        let _ = env_logger::builder().is_test(true).try_init();
    }

    const BASE: &str = r#"
---
settings:
  app_name: AWSTkt
  component: backend
  tier: dev
  num_partitions: 3
common_env:
  UNPUBLISHED: dbuser
layers:
  - name: psycopg3
    architecture: arm64
    arn: arn:psycopg3:arm64
shared_resources:
  secrets: [dbuser]
  queues: [create-report]
permissions:
  env:
    - key: UNPUBLISHED
      grants:
        - kind: secret
          name: dbuser
          actions: [read]
    - key: DBU
      grants:
        - kind: secret
          name: dbuser
          actions: [read]
events:
  queue_consumers:
    - handlers: [create_report_queue_processor]
      queue: create-report
gateway:
  authorizer: cognito
  no_auth_handlers: [get_search_results]
functions:
  - httpMethod: GET
    handler: get_prior_therapy
    routePath: prior_therapy
  - httpMethod: GET
    handler: get_search_results
    routePath: search_results
  - httpMethod: POST
    handler: post_search_results
    routePath: search_results
    simpleName: post_search_results
  - httpMethod: GET
    handler: get_orphan
  - httpMethod: null
    handler: create_report_queue_processor
  - httpMethod: null
    handler: null
    handlerFile: api_etl.py
    extraEnvVars:
      DBU: dbuser
  - httpMethod: null
    handler: null
    handlerFile: etl/cleanup.py
"#;

    fn config() -> Config {
        Config::from_yaml(BASE).unwrap()
    }

    #[test]
    fn test_seven_functions_three_units() {
        init_log();
        let conf = config();
        let mut manifest = Manifest::new(&conf.settings);
        let output = synthesize(&conf, &mut manifest).unwrap();

        let sizes: Vec<_> = output.partitions.iter().map(|p| p.functions.len()).collect();
        assert_eq!(sizes, vec![3, 3, 1]);
        assert_eq!(output.registry.len(), 7);
        assert_eq!(manifest.units.len(), 3);
        assert_eq!(
            manifest.units["AWSTkt-backend-dev-Functions-2"].functions,
            vec!["AWSTkt-backend-dev-etl_cleanup".to_string()]
        );
    }

    #[test]
    fn test_registry_keys_and_lookup() {
        init_log();
        let conf = config();
        let mut manifest = Manifest::new(&conf.settings);
        let output = synthesize(&conf, &mut manifest).unwrap();

        // explicit handler: keyed by handler symbol
        let handle = output.registry.by_name("get_prior_therapy").unwrap();
        assert_eq!(handle.function_name, "AWSTkt-backend-dev-prior_therapy");
        // default handler: keyed by final name
        assert!(output
            .registry
            .by_name("AWSTkt-backend-dev-api_etl")
            .is_some());
        assert!(output
            .registry
            .by_function_name("AWSTkt-backend-dev-post_search_results")
            .is_some());
        assert_eq!(
            output.registry.list()[0].unit.as_deref(),
            Some("AWSTkt-backend-dev-Functions-0")
        );
    }

    #[test]
    fn test_deferred_routes() {
        init_log();
        let conf = config();
        let mut manifest = Manifest::new(&conf.settings);
        let output = synthesize(&conf, &mut manifest).unwrap();

        assert_eq!(output.routes.len(), 3);
        assert!(output.routes.iter().all(|r| !r.imported));

        // root, prior_therapy, search_results
        assert_eq!(manifest.gateway.paths.len(), 3);
        assert_eq!(manifest.gateway.methods.len(), 3);
        let search: Vec<_> = manifest
            .gateway
            .methods
            .iter()
            .filter(|m| m.path == "/api/v1/search_results")
            .collect();
        assert_eq!(search.len(), 2);
        assert_eq!(search[0].authorizer, None);
        assert_eq!(search[1].authorizer.as_deref(), Some("cognito"));

        // reports carry the binding made by the route pass
        let first = &output.partitions[0].functions[0];
        assert_eq!(first.binding, FunctionState::Routed);
        assert_eq!(first.route.as_deref(), Some("GET /api/v1/prior_therapy"));
        let consumer = &output.partitions[1].functions[1];
        assert_eq!(consumer.binding, FunctionState::EventBound);
        assert_eq!(consumer.route, None);
    }

    #[test]
    fn test_inline_routes_match_deferred() {
        init_log();
        let mut conf = config();
        conf.settings.route_mode = RouteMode::Inline;
        let mut manifest = Manifest::new(&conf.settings);
        let output = synthesize(&conf, &mut manifest).unwrap();

        assert_eq!(output.routes.len(), 3);
        assert_eq!(manifest.gateway.methods.len(), 3);
        let first = &output.partitions[0].functions[0];
        assert_eq!(first.binding, FunctionState::Routed);
        assert_eq!(first.route.as_deref(), Some("GET /api/v1/prior_therapy"));
    }

    #[test]
    fn test_route_pass_imports_missing_functions() {
        init_log();
        let conf = config();
        let mut manifest = Manifest::new(&conf.settings);
        let options = SynthesisOptions {
            units: Some(BTreeSet::from([1, 2])),
        };
        let output = synthesize_with(&conf, &mut manifest, &options).unwrap();

        // unit 0 holds the first three routed functions
        assert_eq!(output.registry.len(), 4);
        let imported: Vec<_> = output.routes.iter().filter(|r| r.imported).collect();
        assert_eq!(imported.len(), 3);
        assert!(manifest
            .imported_functions
            .contains("AWSTkt-backend-dev-prior_therapy"));
        assert!(output
            .registry
            .list()
            .iter()
            .all(|h| h.origin == HandleOrigin::Created));
    }

    #[test]
    fn test_inline_subset_imports_unselected_routes() {
        init_log();
        let mut conf = config();
        conf.settings.route_mode = RouteMode::Inline;
        let mut manifest = Manifest::new(&conf.settings);
        let options = SynthesisOptions {
            units: Some(BTreeSet::from([1, 2])),
        };
        let output = synthesize_with(&conf, &mut manifest, &options).unwrap();

        assert_eq!(output.routes.len(), 3);
        assert!(output.routes.iter().all(|r| r.imported));
        assert_eq!(manifest.gateway.methods.len(), 3);
        assert!(manifest
            .imported_functions
            .contains("AWSTkt-backend-dev-post_search_results"));

        // selecting the routed unit binds inline and imports nothing
        let mut manifest = Manifest::new(&conf.settings);
        let options = SynthesisOptions {
            units: Some(BTreeSet::from([0])),
        };
        let output = synthesize_with(&conf, &mut manifest, &options).unwrap();
        assert_eq!(output.routes.len(), 3);
        assert!(output.routes.iter().all(|r| !r.imported));
        assert!(manifest.imported_functions.is_empty());
    }

    #[test]
    fn test_grants_and_events() {
        init_log();
        let conf = config();
        let mut manifest = Manifest::new(&conf.settings);
        synthesize(&conf, &mut manifest).unwrap();

        // one secret read per function, plus the consumer's queue grant
        assert_eq!(manifest.grants.len(), 7 + 1);
        let etl_grants = manifest
            .grants
            .iter()
            .filter(|g| g.principal == "AWSTkt-backend-dev-api_etl")
            .count();
        // UNPUBLISHED and DBU map to the same secret
        assert_eq!(etl_grants, 1);

        assert_eq!(manifest.queue_sources.len(), 1);
        assert_eq!(
            manifest.queue_sources[0].function,
            "AWSTkt-backend-dev-create_report_queue_processor"
        );
        assert!(manifest.log_subscriptions.is_empty());
    }

    #[test]
    fn test_missing_layer_aborts_run() {
        init_log();
        let mut conf = config();
        conf.functions[3].layer_names = vec!["pandas".to_string()];
        let mut manifest = Manifest::new(&conf.settings);

        let err = synthesize(&conf, &mut manifest).err().unwrap();
        assert!(matches!(err, SynthError::UndefinedLayer { .. }));
        // functions before the failing one were already requested
        assert_eq!(manifest.functions.len(), 3);
        assert!(manifest.gateway.methods.is_empty());
    }

    #[test]
    fn test_duplicate_derived_names_fail() {
        init_log();
        let mut conf = config();
        conf.functions[2].simple_name = None;

        let mut manifest = Manifest::new(&conf.settings);
        let err = synthesize(&conf, &mut manifest).err().unwrap();
        assert!(matches!(err, SynthError::Configuration(_)));
        assert_eq!(manifest.functions.len(), 2);

        assert!(plan(&conf).is_err());
    }

    #[test]
    fn test_plan_creates_nothing() {
        init_log();
        let conf = config();
        let units = plan(&conf).unwrap();
        assert_eq!(units.len(), 3);
        assert_eq!(units[1].functions[0].function_name, "AWSTkt-backend-dev-get_orphan");
        assert_eq!(units[2].unit_name, "AWSTkt-backend-dev-Functions-2");
    }
}
