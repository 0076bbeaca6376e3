//! Annotate-and-confirm tests against the in-memory cluster
//!
//! These tests verify:
//! - Whole-batch validation before any write
//! - Confirmation through the custom resource watch
//! - Timeout and partial-effect semantics

use super::*;
use crate::error::ClusterError;
use crate::kinds::ControllerKind;
use crate::policy::{
    LOG_TYPE_ANNOTATION, SERVICE_NAME_ANNOTATION, TRACES_INSTRUMENT_ANNOTATION,
};
use crate::testing::{deployment, instrumented_application, statefulset, FakeCluster};
use serde_json::json;

fn cluster_with(names: &[(&str, &str)]) -> FakeCluster {
    let cluster = FakeCluster::new();
    for (namespace, name) in names {
        cluster.insert_workload(deployment(
            namespace,
            name,
            &[name],
            &[("team", "payments")],
        ));
        cluster.insert_application(instrumented_application(
            namespace,
            name,
            "Deployment",
            json!({"logType": "", "languages": [{"language": "java", "containerName": name}]}),
            json!({"tracesInstrumented": false, "instrumentationDetection": {"phase": "Completed"}}),
        ));
    }
    cluster
}

fn annotator(cluster: &FakeCluster, timeout: Duration) -> Annotator {
    Annotator::new(
        Arc::new(cluster.clone()),
        Arc::new(cluster.clone()),
        timeout,
        StructuredLogger::new("test"),
    )
}

fn traces(namespace: &str, name: &str, kind: &str, action: &str) -> TracesRequest {
    TracesRequest {
        name: name.to_string(),
        controller_kind: kind.to_string(),
        namespace: namespace.to_string(),
        action: action.to_string(),
        service_name: None,
    }
}

fn logs(namespace: &str, name: &str, log_type: &str) -> LogsRequest {
    LogsRequest {
        name: name.to_string(),
        controller_kind: "deployment".to_string(),
        namespace: namespace.to_string(),
        log_type: log_type.to_string(),
    }
}

async fn settle(cluster: &FakeCluster) {
    for _ in 0..20 {
        if cluster.active_watches() == 0 {
            return;
        }
        tokio::task::yield_now().await;
    }
}

mod validation_tests {
    use super::*;

    #[tokio::test]
    async fn test_invalid_kind_rejects_whole_batch() {
        let cluster = cluster_with(&[("shop", "cart"), ("shop", "checkout")]);
        let annotator = annotator(&cluster, Duration::from_secs(2));

        let batch = vec![
            traces("shop", "cart", "deployment", "add"),
            traces("shop", "checkout", "daemonset", "add"),
        ];
        let err = annotator.annotate(&batch).await.unwrap_err();

        match err {
            AnnotateError::Validation(e) => assert_eq!(e.index, 1),
            other => panic!("expected validation error, got {:?}", other),
        }
        assert_eq!(cluster.update_count(), 0);
        assert!(!cluster
            .annotations(ControllerKind::Deployment, "shop", "cart")
            .contains_key(TRACES_INSTRUMENT_ANNOTATION));
    }

    #[tokio::test]
    async fn test_invalid_action_rejects_whole_batch() {
        let cluster = cluster_with(&[("shop", "cart")]);
        let annotator = annotator(&cluster, Duration::from_secs(2));

        let batch = vec![
            traces("shop", "cart", "Deployment", "add"),
            traces("shop", "cart", "deployment", "enable"),
        ];
        assert!(matches!(
            annotator.annotate(&batch).await,
            Err(AnnotateError::Validation(_))
        ));
        assert_eq!(cluster.update_count(), 0);
        assert_eq!(cluster.active_watches(), 0);
    }

    #[test]
    fn test_logs_validation_ignores_action() {
        let plans = validate_batch(&[logs("shop", "cart", "java")]).unwrap();
        assert_eq!(plans[0].target.kind, ControllerKind::Deployment);
        assert_eq!(
            plans[0].delta.updated_annotations()[LOG_TYPE_ANNOTATION],
            "java"
        );
    }

    #[test]
    fn test_logs_validation_rejects_padded_log_type() {
        let err = validate_batch(&[logs("shop", "cart", " java")]).unwrap_err();
        assert_eq!(err.index, 0);
    }
}

mod confirmation_tests {
    use super::*;

    #[tokio::test]
    async fn test_traces_add_is_confirmed() {
        let cluster = cluster_with(&[("shop", "cart")]);
        let annotator = annotator(&cluster, Duration::from_secs(2));

        let mut request = traces("shop", "cart", "Deployment", "add");
        request.service_name = Some("cart-svc".to_string());
        let responses = annotator.annotate(&[request]).await.unwrap();

        assert_eq!(responses.len(), 1);
        assert_eq!(responses[0].controller_kind, "deployment");
        assert_eq!(
            responses[0].updated_annotations,
            BTreeMap::from([
                (TRACES_INSTRUMENT_ANNOTATION.to_string(), "true".to_string()),
                (SERVICE_NAME_ANNOTATION.to_string(), "cart-svc".to_string()),
            ])
        );

        let annotations = cluster.annotations(ControllerKind::Deployment, "shop", "cart");
        assert_eq!(annotations[TRACES_INSTRUMENT_ANNOTATION], "true");
        assert_eq!(annotations["team"], "payments");

        let application = cluster.application("shop", "cart").unwrap();
        assert_eq!(application.data["status"]["tracesInstrumented"], json!(true));
    }

    #[tokio::test]
    async fn test_traces_delete_writes_rollback() {
        let cluster = cluster_with(&[("shop", "cart")]);
        let annotator = annotator(&cluster, Duration::from_secs(2));

        annotator
            .annotate(&[traces("shop", "cart", "deployment", "delete")])
            .await
            .unwrap();

        assert_eq!(
            cluster.annotations(ControllerKind::Deployment, "shop", "cart")
                [TRACES_INSTRUMENT_ANNOTATION],
            "rollback"
        );
    }

    #[tokio::test]
    async fn test_repeated_add_leaves_same_annotations() {
        let cluster = cluster_with(&[("shop", "cart")]);
        let annotator = annotator(&cluster, Duration::from_secs(2));
        let batch = [traces("shop", "cart", "deployment", "add")];

        annotator.annotate(&batch).await.unwrap();
        let once = cluster.annotations(ControllerKind::Deployment, "shop", "cart");
        annotator.annotate(&batch).await.unwrap();
        let twice = cluster.annotations(ControllerKind::Deployment, "shop", "cart");

        assert_eq!(once, twice);
    }

    #[tokio::test]
    async fn test_logs_clear_removes_key_and_reports_absence() {
        let cluster = FakeCluster::new();
        cluster.insert_workload(statefulset(
            "data",
            "db",
            &["postgres"],
            &[(LOG_TYPE_ANNOTATION, "postgres")],
        ));
        cluster.insert_application(instrumented_application(
            "data",
            "db",
            "StatefulSet",
            json!({"logType": "postgres"}),
            json!({"tracesInstrumented": false}),
        ));
        let annotator = annotator(&cluster, Duration::from_secs(2));

        let request = LogsRequest {
            name: "db".to_string(),
            controller_kind: "statefulset".to_string(),
            namespace: "data".to_string(),
            log_type: String::new(),
        };
        let responses = annotator.annotate(&[request]).await.unwrap();

        assert!(responses[0].updated_annotations.is_empty());
        assert!(!cluster
            .annotations(ControllerKind::StatefulSet, "data", "db")
            .contains_key(LOG_TYPE_ANNOTATION));
    }

    #[tokio::test]
    async fn test_multi_item_batch_in_order() {
        let cluster = cluster_with(&[("shop", "cart"), ("shop", "checkout")]);
        let annotator = annotator(&cluster, Duration::from_secs(2));

        let responses = annotator
            .annotate(&[logs("shop", "cart", "java"), logs("shop", "checkout", "nginx")])
            .await
            .unwrap();

        let names: Vec<_> = responses.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, ["cart", "checkout"]);
        assert_eq!(cluster.update_count(), 2);
    }

    #[tokio::test]
    async fn test_watches_released_after_batch() {
        let cluster = cluster_with(&[("shop", "cart")]);
        let annotator = annotator(&cluster, Duration::from_secs(2));

        annotator
            .annotate(&[traces("shop", "cart", "deployment", "add")])
            .await
            .unwrap();

        settle(&cluster).await;
        assert_eq!(cluster.active_watches(), 0);
    }
}

mod failure_tests {
    use super::*;

    #[tokio::test]
    async fn test_timeout_keeps_mutation() {
        let cluster = cluster_with(&[("shop", "cart")]);
        cluster.set_operator_reacts(false);
        let annotator = annotator(&cluster, Duration::from_millis(300));

        let err = annotator
            .annotate(&[traces("shop", "cart", "deployment", "add")])
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            AnnotateError::ConfirmationTimeout { ref name, .. } if name == "cart"
        ));
        assert_eq!(
            cluster.annotations(ControllerKind::Deployment, "shop", "cart")
                [TRACES_INSTRUMENT_ANNOTATION],
            "true"
        );

        settle(&cluster).await;
        assert_eq!(cluster.active_watches(), 0);
    }

    #[tokio::test]
    async fn test_missing_workload_aborts_batch() {
        let cluster = cluster_with(&[("shop", "cart")]);
        let annotator = annotator(&cluster, Duration::from_secs(2));

        let err = annotator
            .annotate(&[
                traces("shop", "cart", "deployment", "add"),
                traces("shop", "ghost", "deployment", "add"),
                traces("shop", "cart", "deployment", "delete"),
            ])
            .await
            .unwrap_err();

        assert!(matches!(err, AnnotateError::Cluster(ClusterError::Get { .. })));
        // First item stays applied, third never ran
        assert_eq!(cluster.update_count(), 1);
        assert_eq!(
            cluster.annotations(ControllerKind::Deployment, "shop", "cart")
                [TRACES_INSTRUMENT_ANNOTATION],
            "true"
        );
    }

    #[tokio::test]
    async fn test_update_conflict_is_surfaced() {
        let cluster = cluster_with(&[("shop", "cart")]);
        cluster.set_fail_updates(true);
        let annotator = annotator(&cluster, Duration::from_secs(2));

        let err = annotator
            .annotate(&[logs("shop", "cart", "java")])
            .await
            .unwrap_err();

        assert!(matches!(err, AnnotateError::Cluster(ClusterError::Update { .. })));
        assert!(err.to_string().contains("shop/cart"));
    }

    #[tokio::test]
    async fn test_watch_failure_aborts_batch() {
        let cluster = cluster_with(&[("shop", "cart"), ("shop", "checkout")]);
        cluster.set_fail_watches(true);
        let annotator = annotator(&cluster, Duration::from_secs(2));

        let err = annotator
            .annotate(&[
                traces("shop", "cart", "deployment", "add"),
                traces("shop", "checkout", "deployment", "add"),
            ])
            .await
            .unwrap_err();

        match err {
            AnnotateError::Cluster(ClusterError::Watch { namespace, name, .. }) => {
                assert_eq!(namespace, "shop");
                assert_eq!(name, "cart");
            }
            other => panic!("expected watch failure, got {:?}", other),
        }
        assert!(cluster.update_count() <= 1);
        assert!(!cluster
            .annotations(ControllerKind::Deployment, "shop", "checkout")
            .contains_key(TRACES_INSTRUMENT_ANNOTATION));
    }

    #[tokio::test]
    async fn test_timeout_stops_later_items() {
        let cluster = cluster_with(&[("shop", "cart"), ("shop", "checkout")]);
        cluster.set_operator_reacts(false);
        let annotator = annotator(&cluster, Duration::from_millis(200));

        let err = annotator
            .annotate(&[
                traces("shop", "cart", "deployment", "add"),
                traces("shop", "checkout", "deployment", "add"),
            ])
            .await
            .unwrap_err();

        assert!(matches!(err, AnnotateError::ConfirmationTimeout { .. }));
        assert_eq!(cluster.update_count(), 1);
        assert!(!cluster
            .annotations(ControllerKind::Deployment, "shop", "checkout")
            .contains_key(TRACES_INSTRUMENT_ANNOTATION));
    }
}
