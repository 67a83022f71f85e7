use weaver_types::{
    AgentClass, AgentDefinition, DomainConfig, ExecutionGraph, FieldType, JobStatus,
};

#[test]
fn agent_definition_roundtrip() {
    let def = AgentDefinition {
        agent_id: "geo".into(),
        tenant_id: "system".into(),
        agent_name: "Geo extractor".into(),
        agent_class: AgentClass::Ingestion,
        system_prompt: "Extract location details.".into(),
        tools: vec!["llm".into(), "geocoder".into()],
        output_schema: [
            ("location".to_string(), FieldType::String),
            ("confidence".to_string(), FieldType::Number),
        ]
        .into_iter()
        .collect(),
        version: 3,
        is_builtin: true,
        strict: false,
        weight: 1.0,
    };
    let json = serde_json::to_string(&def).unwrap();
    let back: AgentDefinition = serde_json::from_str(&json).unwrap();
    assert_eq!(def, back);
    // Schema key order survives the round trip; prompt assembly depends on it.
    let keys: Vec<&String> = back.output_schema.keys().collect();
    assert_eq!(keys, vec!["location", "confidence"]);
}

#[test]
fn domain_config_roundtrip() {
    let domain = DomainConfig {
        domain_id: "civic_complaints".into(),
        tenant_id: "system".into(),
        domain_name: "Civic complaints".into(),
        ingestion: ExecutionGraph::new(
            ["severity", "priority"],
            [("severity", "priority")],
        ),
        query: ExecutionGraph::flat(["what", "where", "when"]),
        management: ExecutionGraph::default(),
    };
    let json = serde_json::to_string(&domain).unwrap();
    let back: DomainConfig = serde_json::from_str(&json).unwrap();
    assert_eq!(domain, back);
    assert!(back.management.is_empty());
}

#[test]
fn job_status_wire_names() {
    assert_eq!(
        serde_json::to_string(&JobStatus::AwaitingClarification).unwrap(),
        "\"awaiting_clarification\""
    );
    let back: JobStatus = serde_json::from_str("\"complete\"").unwrap();
    assert_eq!(back, JobStatus::Complete);
}
