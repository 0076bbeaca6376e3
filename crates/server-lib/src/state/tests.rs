use super::*;
use crate::error::ClusterError;
use crate::testing::{deployment, instrumented_application, statefulset, FakeCluster};
use serde_json::json;

fn decode(obj: &DynamicObject) -> InstrumentedApplication {
    InstrumentedApplication::from_dynamic(obj).unwrap()
}

fn template(containers: usize, annotations: &[(&str, &str)]) -> WorkloadTemplate {
    WorkloadTemplate {
        annotations: annotations
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect(),
        container_count: containers,
    }
}

mod service_name_tests {
    use super::*;

    #[test]
    fn test_annotation_wins() {
        let t = template(1, &[(SERVICE_NAME_ANNOTATION, "svc-x")]);
        assert_eq!(resolve_service_name("shop", "app", Some(&t)), "svc-x");
    }

    #[test]
    fn test_multi_container_uses_container_name() {
        let t = template(2, &[]);
        assert_eq!(resolve_service_name("queue", "worker", Some(&t)), "worker");
    }

    #[test]
    fn test_matching_owner_name_not_duplicated() {
        let t = template(1, &[]);
        assert_eq!(resolve_service_name("api", "api", Some(&t)), "api");
    }

    #[test]
    fn test_fallback_concatenates_lowercased_owner() {
        let t = template(1, &[]);
        assert_eq!(resolve_service_name("Billing", "app", Some(&t)), "billing-app");
        assert_eq!(resolve_service_name("Billing", "app", None), "billing-app");
    }

    #[test]
    fn test_empty_annotation_ignored() {
        let t = template(1, &[(SERVICE_NAME_ANNOTATION, "")]);
        assert_eq!(resolve_service_name("shop", "app", Some(&t)), "shop-app");
    }
}

mod projection_tests {
    use super::*;

    #[test]
    fn test_one_record_per_language() {
        let obj = instrumented_application(
            "shop",
            "cart",
            "Deployment",
            json!({
                "logType": "java",
                "languages": [
                    {"language": "java", "containerName": "cart", "opentelemetryPreconfigured": true},
                    {"language": "python", "containerName": "metrics"},
                    {"language": "go", "containerName": "proxy"}
                ]
            }),
            json!({"tracesInstrumented": true, "instrumentationDetection": {"phase": "Completed"}}),
        );
        let index = WorkloadIndex::from_workloads(&[deployment(
            "shop",
            "cart",
            &["cart", "metrics", "proxy"],
            &[],
        )]);

        let records = project_application(&decode(&obj), &index);
        assert_eq!(records.len(), 3);
        for record in &records {
            assert_eq!(record.controller_kind, "deployment");
            assert!(record.traces_instrumented);
            assert!(record.traces_instrumentable);
            assert_eq!(record.detection_status, DetectionPhase::Completed);
            assert_eq!(record.log_type.as_deref(), Some("java"));
            assert!(record.application.is_none());
        }
        assert_eq!(records[0].opentelemetry_preconfigured, Some(true));
        assert_eq!(records[1].opentelemetry_preconfigured, Some(false));
        // Three containers, so each keeps its own name
        assert_eq!(records[2].service_name.as_deref(), Some("proxy"));
    }

    #[test]
    fn test_applications_are_not_instrumentable() {
        let obj = instrumented_application(
            "data",
            "db",
            "StatefulSet",
            json!({"applications": [{"application": "postgres", "containerName": "postgres"}]}),
            json!({"tracesInstrumented": false, "instrumentationDetection": {"phase": "Running"}}),
        );

        let records = project_application(&decode(&obj), &WorkloadIndex::default());
        assert_eq!(records.len(), 1);
        let record = &records[0];
        assert_eq!(record.controller_kind, "statefulset");
        assert_eq!(record.application.as_deref(), Some("postgres"));
        assert!(!record.traces_instrumentable);
        assert_eq!(record.opentelemetry_preconfigured, Some(false));
        assert!(record.service_name.is_none());
        assert!(record.language.is_none());
    }

    #[test]
    fn test_no_detection_yields_single_bare_record() {
        let obj = instrumented_application("shop", "cart", "Deployment", json!({}), json!(null));

        let records = project_application(&decode(&obj), &WorkloadIndex::default());
        assert_eq!(records.len(), 1);
        let record = &records[0];
        assert!(record.container_name.is_none());
        assert!(record.language.is_none());
        assert!(!record.traces_instrumentable);
        assert!(!record.traces_instrumented);
        assert_eq!(record.detection_status, DetectionPhase::Pending);
        assert!(record.opentelemetry_preconfigured.is_none());
        assert!(record.log_type.is_none());
    }

    #[test]
    fn test_empty_language_list_yields_nothing() {
        let obj = instrumented_application(
            "shop",
            "cart",
            "Deployment",
            json!({"languages": []}),
            json!({}),
        );
        assert!(project_application(&decode(&obj), &WorkloadIndex::default()).is_empty());
    }

    #[test]
    fn test_annotated_service_name_used_for_single_container() {
        let obj = instrumented_application(
            "shop",
            "cart",
            "Deployment",
            json!({"languages": [{"language": "java", "containerName": "app"}]}),
            json!({}),
        );
        let index = WorkloadIndex::from_workloads(&[deployment(
            "shop",
            "cart",
            &["app"],
            &[(SERVICE_NAME_ANNOTATION, "svc-x")],
        )]);

        let records = project_application(&decode(&obj), &index);
        assert_eq!(records[0].service_name.as_deref(), Some("svc-x"));
    }

    #[test]
    fn test_index_lookup_is_kind_aware() {
        let index = WorkloadIndex::from_workloads(&[
            deployment("shop", "cart", &["a", "b"], &[]),
            statefulset("shop", "cart", &["a"], &[]),
        ]);
        assert_eq!(index.get("Deployment", "shop", "cart").unwrap().container_count, 2);
        assert_eq!(index.get("statefulset", "shop", "cart").unwrap().container_count, 1);
        assert!(index.get("DaemonSet", "shop", "cart").is_none());
    }

    #[test]
    fn test_internal_resources_filtered() {
        assert!(is_internal_resource("ezkonnect-internal-foo"));
        assert!(is_internal_resource("kubernetes-instrumentor"));
        assert!(!is_internal_resource("kubernetes-instrumentor-helper"));

        let objects = vec![
            instrumented_application("monitoring", "ezkonnect-internal-foo", "Deployment", json!({}), json!({})),
            instrumented_application("shop", "cart", "Deployment", json!({}), json!({})),
        ];
        let projection = project(&objects, &WorkloadIndex::default());
        assert_eq!(projection.resources, 1);
        assert_eq!(projection.records.len(), 1);
        assert_eq!(projection.records[0].name, "cart");
    }

    #[test]
    fn test_undecodable_document_skipped() {
        let objects = vec![
            instrumented_application(
                "shop",
                "broken",
                "Deployment",
                json!({"languages": [{"language": "java"}]}),
                json!({}),
            ),
            instrumented_application("shop", "cart", "Deployment", json!({}), json!({})),
        ];
        let projection = project(&objects, &WorkloadIndex::default());
        assert_eq!(projection.skipped, vec!["shop/broken".to_string()]);
        assert_eq!(projection.records.len(), 1);
    }

    #[test]
    fn test_record_serializes_nulls() {
        let obj = instrumented_application("shop", "cart", "Deployment", json!({}), json!({}));
        let records = project_application(&decode(&obj), &WorkloadIndex::default());
        let value = serde_json::to_value(&records[0]).unwrap();

        assert_eq!(value["container_name"], json!(null));
        assert_eq!(value["log_type"], json!(null));
        assert_eq!(value["opentelemetry_preconfigured"], json!(null));
        assert_eq!(value["detection_status"], json!("pending"));
        assert_eq!(value["controller_kind"], json!("deployment"));
    }
}

mod reader_tests {
    use super::*;

    fn reader(cluster: &FakeCluster) -> StateReader {
        StateReader::new(
            Arc::new(cluster.clone()),
            Arc::new(cluster.clone()),
            StructuredLogger::new("test"),
        )
    }

    #[tokio::test]
    async fn test_read_state_resolves_from_cluster_workloads() {
        let cluster = FakeCluster::new();
        cluster.insert_workload(deployment("shop", "api", &["api"], &[]));
        cluster.insert_application(instrumented_application(
            "shop",
            "api",
            "Deployment",
            json!({"languages": [{"language": "nodejs", "containerName": "api"}]}),
            json!({"tracesInstrumented": false}),
        ));

        let records = reader(&cluster).read_state().await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].service_name.as_deref(), Some("api"));
        assert_eq!(records[0].language.as_deref(), Some("nodejs"));
    }

    #[tokio::test]
    async fn test_read_state_empty_cluster() {
        let cluster = FakeCluster::new();
        assert!(reader(&cluster).read_state().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_read_state_surfaces_list_failure() {
        let cluster = FakeCluster::new();
        cluster.set_fail_lists(true);

        let err = reader(&cluster).read_state().await.unwrap_err();
        assert!(matches!(err, StateError::Cluster(ClusterError::List { .. })));
    }
}
