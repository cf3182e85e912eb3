//! End-to-end turns over an in-memory corpus: ingest, embed, retrieve,
//! and run both graphs through the public orchestrator API.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};

use auslaw::config::OrchestratorConfig;
use auslaw::embed_cmd::embed_pending;
use auslaw::embedding::EmbeddingProvider;
use auslaw::ingest::ingest_document;
use auslaw::model::{ModelError, ModelProvider, ModelRequest};
use auslaw::orchestrator::{
    Attachment, InMemorySessionStore, Orchestrator, SessionMode, TurnArtifact, TurnFlag, TurnRequest, TurnRoute,
};
use auslaw::resources::RiskCategory;
use auslaw::retriever::HybridRetriever;
use auslaw_core::chunk::ChunkingParams;
use auslaw_core::models::{Document, Jurisdiction};
use auslaw_core::search::SearchParams;
use auslaw_core::store::memory::InMemoryStore;

/// Counts character trigrams into a fixed number of buckets.
struct TrigramEmbedder;

#[async_trait]
impl EmbeddingProvider for TrigramEmbedder {
    fn model_name(&self) -> &str {
        "trigram-64"
    }
    fn dims(&self) -> usize {
        64
    }
    async fn embed(&self, texts: &[String]) -> anyhow::Result<Vec<Vec<f32>>> {
        Ok(texts
            .iter()
            .map(|t| {
                let mut v = vec![0.0f32; 64];
                let chars: Vec<char> = t.to_lowercase().chars().collect();
                for w in chars.windows(3) {
                    let h = w.iter().fold(7u32, |acc, c| acc.wrapping_mul(31).wrapping_add(*c as u32));
                    v[(h % 64) as usize] += 1.0;
                }
                v[0] += 1.0;
                v
            })
            .collect())
    }
}

type Script = dyn Fn(&ModelRequest) -> Result<Value, ModelError> + Send + Sync;

/// Model answering by request purpose.
struct ScriptedModel {
    script: Box<Script>,
    calls: AtomicUsize,
}

impl ScriptedModel {
    fn new(script: impl Fn(&ModelRequest) -> Result<Value, ModelError> + Send + Sync + 'static) -> Self {
        Self {
            script: Box::new(script),
            calls: AtomicUsize::new(0),
        }
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ModelProvider for ScriptedModel {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn complete(&self, req: &ModelRequest) -> Result<String, ModelError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let v = (self.script)(req)?;
        Ok(v.as_str().map(str::to_string).unwrap_or_else(|| v.to_string()))
    }

    async fn structured(&self, req: &ModelRequest, _schema: &Value) -> Result<Value, ModelError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        (self.script)(req)
    }
}

fn tenancy_model() -> ScriptedModel {
    ScriptedModel::new(|req| {
        Ok(match req.purpose {
            "safety_classification" => json!({"category": "clear"}),
            "issue_identification" => json!({
                "primary_issue": {"area": "tenancy", "sub_category": "rent_increase",
                                  "description": "Notice period for a rent increase"},
                "secondary_issues": [], "complexity_score": 0.1
            }),
            "strategy_formulation" => json!({
                "summary": "Your landlord must give at least 60 days written notice.",
                "options": [{"title": "Check the notice date", "description": "", "cost_tier": "free"}],
                "recommended": null, "next_steps": []
            }),
            "adaptive_answer" => json!("In NSW, a landlord must give 60 days written notice of a rent increase."),
            "chat_response" => json!("Your landlord must give you 60 days written notice."),
            "brief_fact_extraction" => json!({
                "legal_area": "tenancy",
                "situation_summary": "Landlord raised rent with two weeks notice",
                "key_facts": ["Notice received 1 March", "Increase of $50 per week"],
                "parties_involved": ["tenant", "landlord"],
                "timeline_events": [], "documents_mentioned": [], "user_goals": [],
                "missing_critical_info": ["lease status"],
                "confidence": 0.5
            }),
            "brief_questions" => json!({"questions": ["Are you on a fixed term or periodic lease?"]}),
            "brief_generation" => json!({
                "executive_summary": "Tenant disputes a rent increase given on short notice.",
                "legal_area": "tenancy",
                "jurisdiction": "NSW",
                "situation_narrative": "The landlord gave two weeks notice of a $50 increase.",
                "key_facts": ["Notice received 1 March"],
                "fact_gaps": [],
                "parties": ["Tenant", "Landlord"],
                "documents_evidence": [],
                "client_goals": ["Keep the current rent"],
                "potential_issues": ["Invalid notice"],
                "questions_for_lawyer": ["Can I refuse to pay the increase?"],
                "urgency_level": "standard",
                "urgency_reason": "Increase not yet in effect"
            }),
            _ => json!({}),
        })
    })
}

async fn corpus_retriever() -> Arc<HybridRetriever> {
    let store = Arc::new(InMemoryStore::new());
    let params = ChunkingParams::default();
    let docs = [
        (
            "rta-2010-s41",
            "Residential Tenancies Act 2010 (NSW) s 41",
            Jurisdiction::Nsw,
            "A landlord must not increase the rent payable unless the landlord gives the tenant not less than 60 days written notice of the increase.",
        ),
        (
            "rta-2010-s159",
            "Residential Tenancies Act 2010 (NSW) s 159",
            Jurisdiction::Nsw,
            "A landlord who receives a rental bond must deposit it with the Secretary within 10 working days.",
        ),
        (
            "rtraa-2008-s91",
            "Residential Tenancies and Rooming Accommodation Act 2008 (Qld) s 91",
            Jurisdiction::Qld,
            "The lessor may increase the rent only by giving the tenant at least 2 months notice in writing.",
        ),
    ];
    for (id, citation, jurisdiction, text) in docs {
        let doc = Document {
            id: id.into(),
            citation: citation.into(),
            jurisdiction,
            source_url: None,
            text: text.into(),
            effective_date: None,
        };
        ingest_document(store.as_ref(), &doc, &params).await.unwrap();
    }
    let report = embed_pending(store.as_ref(), &TrigramEmbedder, None, 16).await.unwrap();
    assert_eq!(report.failed, 0);
    assert_eq!(report.embedded, report.pending);

    Arc::new(HybridRetriever::new(
        store,
        Arc::new(TrigramEmbedder),
        None,
        SearchParams::default(),
        Duration::from_secs(5),
    ))
}

async fn orchestrator_with(model: Arc<ScriptedModel>) -> Orchestrator {
    Orchestrator::new(
        model,
        corpus_retriever().await,
        Arc::new(InMemorySessionStore::new()),
        OrchestratorConfig::default(),
    )
}

fn turn(session: &str, message: &str) -> TurnRequest {
    TurnRequest {
        session_id: Some(session.to_string()),
        message: message.to_string(),
        declared_jurisdiction: Some("NSW".to_string()),
        ..Default::default()
    }
}

#[tokio::test]
async fn test_retrieval_respects_state_filter() {
    let retriever = corpus_retriever().await;
    let hits = retriever
        .retrieve("rent increase notice", Some(Jurisdiction::Qld))
        .await
        .unwrap();
    assert!(!hits.is_empty());
    assert!(hits.iter().all(|h| h.jurisdiction == Jurisdiction::Qld));
}

#[tokio::test]
async fn test_nsw_rent_question_in_chat_mode() {
    let orch = orchestrator_with(Arc::new(tenancy_model())).await;
    let out = orch
        .handle_turn(turn("t1", "How much notice does my landlord need to give for a rent increase?"))
        .await
        .unwrap();
    assert_eq!(out.route, TurnRoute::Chat);
    assert!(out.reply.contains("60 days"));
    assert!(out
        .citations
        .iter()
        .any(|c| c == "Residential Tenancies Act 2010 (NSW) s 41"));
    assert_eq!(out.state.jurisdiction, Some(Jurisdiction::Nsw));
}

#[tokio::test]
async fn test_nsw_rent_question_in_adaptive_mode() {
    let orch = orchestrator_with(Arc::new(tenancy_model())).await;
    let out = orch
        .handle_turn(TurnRequest {
            mode: Some(SessionMode::Adaptive),
            ..turn("t2", "What is the notice period for a rent increase?")
        })
        .await
        .unwrap();
    assert_eq!(out.route, TurnRoute::SimplePath);
    assert!(out.reply.contains("60 days"));
    assert!(!out.routing.unwrap().is_complex());
}

#[tokio::test]
async fn test_crisis_lexicon_escalates_without_model_call() {
    let model = Arc::new(tenancy_model());
    let orch = orchestrator_with(model.clone()).await;
    let out = orch
        .handle_turn(turn("t3", "I can't cope anymore and I want to end it all"))
        .await
        .unwrap();
    assert_eq!(out.route, TurnRoute::Escalate);
    assert!(out.reply.contains("13 11 14"));
    match out.artifact {
        Some(TurnArtifact::Escalation { category, .. }) => assert_eq!(category, RiskCategory::SuicideSelfHarm),
        other => panic!("unexpected artifact {:?}", other),
    }
    assert_eq!(model.calls(), 0);
}

#[tokio::test]
async fn test_attachment_routes_complex() {
    let orch = orchestrator_with(Arc::new(tenancy_model())).await;
    let mut req = TurnRequest {
        mode: Some(SessionMode::Adaptive),
        ..turn("t4", "Is this lease term legal?")
    };
    req.attachments.push(Attachment {
        name: Some("lease.txt".into()),
        text: "Residential tenancy agreement. The landlord may increase the rent at any time with 14 days notice.".into(),
    });
    let out = orch.handle_turn(req).await.unwrap();
    assert_eq!(out.route, TurnRoute::ComplexPath);
    assert!(out.routing.unwrap().is_complex());
}

#[tokio::test]
async fn test_brief_flow_asks_then_generates() {
    let orch = orchestrator_with(Arc::new(tenancy_model())).await;
    orch.handle_turn(turn("t5", "My landlord put the rent up with only two weeks notice"))
        .await
        .unwrap();

    let ask = orch.handle_turn(turn("t5", "[GENERATE_BRIEF]")).await.unwrap();
    assert_eq!(ask.route, TurnRoute::BriefQuestions);
    assert!(ask.reply.contains("fixed term or periodic"));
    assert!(ask.state.brief.active);

    let mut last = ask;
    for _ in 0..3 {
        if last.route == TurnRoute::Brief {
            break;
        }
        last = orch
            .handle_turn(turn("t5", "It's a periodic lease I think, not sure"))
            .await
            .unwrap();
    }
    assert_eq!(last.route, TurnRoute::Brief);
    assert!(last.flags.contains(&TurnFlag::BriefIncomplete));
    assert!(last.reply.starts_with("# Lawyer Brief"));
    match last.artifact {
        Some(TurnArtifact::LawyerBrief(ref brief)) => assert!(brief.incomplete),
        ref other => panic!("unexpected artifact {:?}", other),
    }
    assert!(!last.state.brief.active);
}

#[tokio::test]
async fn test_sessions_are_independent() {
    let orch = orchestrator_with(Arc::new(tenancy_model())).await;
    let a = orch
        .handle_turn(turn("a", "How much notice for a rent increase?"))
        .await
        .unwrap();
    let b = orch
        .handle_turn(TurnRequest {
            declared_jurisdiction: Some("QLD".into()),
            ..turn("b", "How much notice for a rent increase?")
        })
        .await
        .unwrap();
    assert_eq!(a.state.messages.len(), 2);
    assert_eq!(b.state.messages.len(), 2);
    assert_eq!(a.state.jurisdiction, Some(Jurisdiction::Nsw));
    assert_eq!(b.state.jurisdiction, Some(Jurisdiction::Qld));
}
