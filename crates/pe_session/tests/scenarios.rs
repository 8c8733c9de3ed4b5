//! End-to-end session scenarios over a real sessions directory: literal
//! rating expectations, crash-recovery behavior, state-machine edges, and
//! the audit/checkpoint bookkeeping invariants.

use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Duration, TimeZone, Utc};

use pe_core::{
    order_rng_from_seed, ComparisonMethod, Config, FixedClock, SessionStatus,
};
use pe_io::{AuditEventType, AuditJournal, AuditQuery};
use pe_session::{ComparisonError, ComparisonOutcome, Session, SessionError, SessionManager};

const TABLE_AB: &str = "id,title\nA,Alpha Talk\nB,Beta Talk\n";
const TABLE_ABC: &str = "id,title\nA,Alpha Talk\nB,Beta Talk\nC,Gamma Talk\n";

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 1, 10, 9, 0, 0).unwrap()
}

struct Fixture {
    _dir: tempfile::TempDir,
    clock: Arc<FixedClock>,
    manager: SessionManager,
    input: PathBuf,
}

fn fixture(table: &str) -> Fixture {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("proposals.csv");
    fs::write(&input, table).unwrap();
    let clock = Arc::new(FixedClock::new(t0()));
    let manager = SessionManager::new(dir.path().join("sessions"), clock.clone());
    Fixture {
        _dir: dir,
        clock,
        manager,
        input,
    }
}

fn create(fx: &Fixture, name: &str, config: Config) -> Session {
    let (session, errors) = fx
        .manager
        .create(name, &fx.input, config, order_rng_from_seed(7))
        .unwrap();
    assert!(errors.is_empty());
    session
}

fn ids(xs: &[&str]) -> Vec<String> {
    xs.iter().map(|s| s.to_string()).collect()
}

// ----------------------------- Literal scenarios -----------------------------

#[test]
fn pairwise_basic_moves_sixteen_points() {
    let fx = fixture(TABLE_AB);
    let mut s = create(&fx, "s1", Config::default());

    s.start_comparison(&ids(&["A", "B"]), ComparisonMethod::Pairwise)
        .unwrap();
    fx.clock.advance(Duration::seconds(5));
    let done = s
        .complete_comparison(ComparisonOutcome::Winner("A".into()))
        .unwrap();

    assert_eq!(done.winner_id, "A");
    assert_eq!(s.proposal("A").unwrap().score, 1516.0);
    assert_eq!(s.proposal("B").unwrap().score, 1484.0);
    assert_eq!(s.total_comparisons(), 1);

    // Journal: exactly comparison_completed + two rating_updated, seq 0..2.
    let entries = AuditJournal::read_verified(s.audit_path()).unwrap();
    assert_eq!(entries.len(), 3);
    assert_eq!(entries[0].event_type, AuditEventType::ComparisonCompleted);
    assert_eq!(entries[1].event_type, AuditEventType::RatingUpdated);
    assert_eq!(entries[2].event_type, AuditEventType::RatingUpdated);
    assert_eq!(
        entries.iter().map(|e| e.sequence).collect::<Vec<_>>(),
        vec![0, 1, 2]
    );
    // Participant order: A then B.
    assert_eq!(entries[1].data["proposal_id"], "A");
    assert_eq!(entries[2].data["proposal_id"], "B");
}

#[test]
fn trio_decomposition_nets_plus_k_zero_minus_k() {
    let fx = fixture(TABLE_ABC);
    let mut cfg = Config::default();
    cfg.comparison_mode = ComparisonMethod::Trio;
    let mut s = create(&fx, "s2", cfg);

    s.start_comparison(&ids(&["A", "B", "C"]), ComparisonMethod::Trio)
        .unwrap();
    let done = s
        .complete_comparison(ComparisonOutcome::Rankings(ids(&["B", "A", "C"])))
        .unwrap();

    assert_eq!(done.winner_id, "B");
    assert_eq!(done.rankings, Some(ids(&["B", "A", "C"])));
    assert_eq!(s.proposal("B").unwrap().score, 1532.0);
    assert_eq!(s.proposal("A").unwrap().score, 1500.0);
    assert_eq!(s.proposal("C").unwrap().score, 1468.0);

    // One completed event plus three rating updates in participant order.
    let entries = AuditJournal::read_verified(s.audit_path()).unwrap();
    assert_eq!(entries.len(), 4);
    assert_eq!(entries[1].data["proposal_id"], "A");
    assert_eq!(entries[2].data["proposal_id"], "B");
    assert_eq!(entries[3].data["proposal_id"], "C");
}

#[test]
fn clamp_at_max_rating() {
    let fx = fixture("id,title,score\nA,Alpha Talk,1505\nB,Beta Talk,1500\n");
    let mut cfg = Config::default();
    // Identity output scale so the table scores land as exact ratings.
    cfg.rating.max_rating = 1510.0;
    cfg.rating.output_min = 0.0;
    cfg.rating.output_max = 1510.0;
    cfg.rating.use_decimals = true;
    cfg.source.score_column = Some("score".into());
    let mut s = create(&fx, "s3", cfg);

    assert!((s.proposal("A").unwrap().score - 1505.0).abs() < 1e-9);
    s.start_comparison(&ids(&["A", "B"]), ComparisonMethod::Pairwise)
        .unwrap();
    let done = s
        .complete_comparison(ComparisonOutcome::Winner("A".into()))
        .unwrap();

    assert_eq!(s.proposal("A").unwrap().score, 1510.0);
    let b = s.proposal("B").unwrap().score;
    assert!((b - 1484.23).abs() < 0.5, "B was {b}");
    // Zero-sum does not hold under clamping.
    let net: f64 = done.updates.iter().map(|u| u.delta).sum();
    assert!(net < 0.0);
}

#[test]
fn resume_after_crash_keeps_checkpoint_scores() {
    let fx = fixture(TABLE_ABC);
    let s = create(&fx, "s5", Config::default());
    let checkpoint_path = fx.manager.store().checkpoint_path("s5");
    let pre_comparison = fs::read(&checkpoint_path).unwrap();

    let mut s = s;
    s.start_comparison(&ids(&["A", "B"]), ComparisonMethod::Pairwise)
        .unwrap();
    s.complete_comparison(ComparisonOutcome::Winner("A".into()))
        .unwrap();
    drop(s);

    // Crash simulation: the audit batch landed but the checkpoint rename did
    // not — the old checkpoint is still in place.
    fs::write(&checkpoint_path, pre_comparison).unwrap();

    let resumed = fx
        .manager
        .resume("s5", order_rng_from_seed(7))
        .unwrap();
    assert_eq!(resumed.proposal("A").unwrap().score, 1500.0);
    assert_eq!(resumed.proposal("B").unwrap().score, 1500.0);
    assert_eq!(resumed.total_comparisons(), 0);

    // The journal still carries the full batch; it is not replayed.
    let entries = AuditJournal::read_verified(resumed.audit_path()).unwrap();
    assert_eq!(entries.len(), 3);
}

// ----------------------------- Persistence round trips -----------------------------

#[test]
fn save_load_round_trip_restores_scores_and_counters() {
    let fx = fixture(TABLE_ABC);
    let mut s = create(&fx, "rt", Config::default());

    for (w, l) in [("A", "B"), ("A", "C"), ("B", "C")] {
        s.start_comparison(&ids(&[w, l]), ComparisonMethod::Pairwise)
            .unwrap();
        fx.clock.advance(Duration::minutes(1));
        s.complete_comparison(ComparisonOutcome::Winner(w.into()))
            .unwrap();
    }
    let scores = s.proposal_scores();
    let counts = s.comparison_counts().clone();
    let metrics = s.metrics().clone();
    drop(s);

    let resumed = fx.manager.resume("rt", order_rng_from_seed(1)).unwrap();
    assert_eq!(resumed.proposal_scores(), scores);
    assert_eq!(resumed.comparison_counts(), &counts);
    assert_eq!(resumed.total_comparisons(), 3);
    assert_eq!(resumed.metrics(), &metrics);
}

#[test]
fn source_table_changes_are_observable_after_resume() {
    let fx = fixture(TABLE_ABC);
    let mut s = create(&fx, "truth", Config::default());
    s.start_comparison(&ids(&["A", "B"]), ComparisonMethod::Pairwise)
        .unwrap();
    s.complete_comparison(ComparisonOutcome::Winner("A".into()))
        .unwrap();
    drop(s);

    // Retitle A and drop C; add D. The table is ground truth for identity.
    fs::write(
        &fx.input,
        "id,title\nA,Alpha Talk v2\nB,Beta Talk\nD,Delta Talk\n",
    )
    .unwrap();

    let resumed = fx.manager.resume("truth", order_rng_from_seed(1)).unwrap();
    assert_eq!(resumed.proposal("A").unwrap().title, "Alpha Talk v2");
    assert_eq!(resumed.proposal("A").unwrap().score, 1516.0);
    assert_eq!(resumed.proposal("B").unwrap().score, 1484.0);
    // D never had a checkpointed score: source-table default applies.
    assert_eq!(resumed.proposal("D").unwrap().score, 1500.0);
    assert!(resumed.proposal("C").is_none());
}

#[test]
fn total_comparisons_equals_audited_finished_rounds() {
    let fx = fixture(TABLE_ABC);
    let mut s = create(&fx, "prop6", Config::default());

    s.start_comparison(&ids(&["A", "B"]), ComparisonMethod::Pairwise)
        .unwrap();
    s.complete_comparison(ComparisonOutcome::Winner("A".into()))
        .unwrap();
    s.start_comparison(&ids(&["B", "C"]), ComparisonMethod::Pairwise)
        .unwrap();
    s.complete_comparison(ComparisonOutcome::Skipped {
        reason: Some("conflict of interest".into()),
    })
    .unwrap();
    s.start_comparison(&ids(&["A", "C"]), ComparisonMethod::Pairwise)
        .unwrap();
    s.complete_comparison(ComparisonOutcome::Winner("C".into()))
        .unwrap();
    drop(s);

    let resumed = fx.manager.resume("prop6", order_rng_from_seed(1)).unwrap();
    let finished = AuditJournal::query(
        resumed.audit_path(),
        &AuditQuery {
            event_types: Some(vec![
                AuditEventType::ComparisonCompleted,
                AuditEventType::ComparisonSkipped,
            ]),
            ..AuditQuery::default()
        },
    )
    .unwrap();
    assert_eq!(resumed.total_comparisons(), finished.len() as u64);
    assert_eq!(resumed.total_comparisons(), 3);
}

// ----------------------------- Comparison validation -----------------------------

#[test]
fn skip_changes_no_ratings() {
    let fx = fixture(TABLE_AB);
    let mut s = create(&fx, "skip", Config::default());
    s.start_comparison(&ids(&["A", "B"]), ComparisonMethod::Pairwise)
        .unwrap();
    let done = s
        .complete_comparison(ComparisonOutcome::Skipped { reason: None })
        .unwrap();
    assert!(done.skipped);
    assert_eq!(done.winner_id, "");
    assert!(done.updates.is_empty());
    assert_eq!(s.proposal("A").unwrap().score, 1500.0);
    assert_eq!(s.total_comparisons(), 1);
    // Appears in no per-proposal count.
    assert!(s.comparison_counts().is_empty());

    let entries = AuditJournal::read_verified(s.audit_path()).unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].event_type, AuditEventType::ComparisonSkipped);
}

#[test]
fn invalid_outcomes_leave_the_comparison_active() {
    let fx = fixture(TABLE_ABC);
    let mut s = create(&fx, "bad", Config::default());
    s.start_comparison(&ids(&["A", "B"]), ComparisonMethod::Pairwise)
        .unwrap();

    let err = s
        .complete_comparison(ComparisonOutcome::Winner("C".into()))
        .unwrap_err();
    assert!(matches!(
        err,
        SessionError::Comparison(ComparisonError::WinnerNotInComparison(_))
    ));
    assert!(s.current_comparison().is_some());

    let err = s
        .complete_comparison(ComparisonOutcome::Rankings(ids(&["A", "A"])))
        .unwrap_err();
    assert!(matches!(
        err,
        SessionError::Comparison(ComparisonError::RankingsNotPermutation)
    ));

    // A valid outcome still lands afterwards.
    s.complete_comparison(ComparisonOutcome::Winner("A".into()))
        .unwrap();
    assert!(s.current_comparison().is_none());
}

#[test]
fn start_preconditions() {
    let fx = fixture(TABLE_ABC);
    let mut s = create(&fx, "pre", Config::default());

    let err = s
        .start_comparison(&ids(&["A"]), ComparisonMethod::Pairwise)
        .unwrap_err();
    assert!(matches!(
        err,
        SessionError::Comparison(ComparisonError::ParticipantCount { expected: 2, got: 1, .. })
    ));

    let err = s
        .start_comparison(&ids(&["A", "Z"]), ComparisonMethod::Pairwise)
        .unwrap_err();
    assert!(matches!(
        err,
        SessionError::Comparison(ComparisonError::UnknownProposal(_))
    ));

    let err = s
        .start_comparison(&ids(&["A", "A"]), ComparisonMethod::Pairwise)
        .unwrap_err();
    assert!(matches!(
        err,
        SessionError::Comparison(ComparisonError::DuplicateParticipant(_))
    ));

    s.start_comparison(&ids(&["A", "B"]), ComparisonMethod::Pairwise)
        .unwrap();
    let err = s
        .start_comparison(&ids(&["A", "C"]), ComparisonMethod::Pairwise)
        .unwrap_err();
    assert!(matches!(
        err,
        SessionError::Comparison(ComparisonError::ComparisonInProgress)
    ));
}

#[test]
fn winner_shortcut_is_pairwise_only() {
    let fx = fixture(TABLE_ABC);
    let mut s = create(&fx, "trio-winner", Config::default());
    s.start_comparison(&ids(&["A", "B", "C"]), ComparisonMethod::Trio)
        .unwrap();
    let err = s
        .complete_comparison(ComparisonOutcome::Winner("A".into()))
        .unwrap_err();
    assert!(matches!(
        err,
        SessionError::Comparison(ComparisonError::RankingsRequired(_))
    ));
}

#[test]
fn cancel_discards_without_audit_or_rating_change() {
    let fx = fixture(TABLE_AB);
    let mut s = create(&fx, "cancel", Config::default());
    s.start_comparison(&ids(&["A", "B"]), ComparisonMethod::Pairwise)
        .unwrap();
    s.cancel_comparison().unwrap();
    assert!(s.current_comparison().is_none());
    assert_eq!(s.total_comparisons(), 0);
    assert_eq!(s.proposal("A").unwrap().score, 1500.0);
    assert_eq!(
        AuditJournal::read_verified(s.audit_path()).unwrap().len(),
        0
    );
    assert!(matches!(
        s.cancel_comparison().unwrap_err(),
        SessionError::Comparison(ComparisonError::NoActiveComparison)
    ));
}

// ----------------------------- State machine -----------------------------

#[test]
fn lifecycle_created_active_paused_complete() {
    let fx = fixture(TABLE_AB);
    let mut s = create(&fx, "life", Config::default());
    assert_eq!(s.status(), SessionStatus::Created);

    // Pause from created is not a legal transition.
    assert!(matches!(s.pause(), Err(SessionError::InvalidState(_))));

    s.start_comparison(&ids(&["A", "B"]), ComparisonMethod::Pairwise)
        .unwrap();
    assert_eq!(s.status(), SessionStatus::Active);
    s.pause().unwrap();
    assert_eq!(s.status(), SessionStatus::Paused);
    assert!(s.current_comparison().is_none());

    // Comparing while paused is rejected until resume.
    assert!(matches!(
        s.start_comparison(&ids(&["A", "B"]), ComparisonMethod::Pairwise),
        Err(SessionError::InvalidState(_))
    ));
    s.resume().unwrap();
    assert_eq!(s.status(), SessionStatus::Active);

    s.finish().unwrap();
    assert_eq!(s.status(), SessionStatus::Complete);

    // Every mutation now fails.
    assert!(matches!(
        s.start_comparison(&ids(&["A", "B"]), ComparisonMethod::Pairwise),
        Err(SessionError::InvalidState(_))
    ));
    assert!(matches!(s.pause(), Err(SessionError::InvalidState(_))));
    assert!(matches!(s.finish(), Err(SessionError::InvalidState(_))));

    let entries = AuditJournal::read_verified(s.audit_path()).unwrap();
    let types: Vec<_> = entries.iter().map(|e| e.event_type).collect();
    assert_eq!(
        types,
        vec![
            AuditEventType::SessionPaused,
            AuditEventType::SessionCompleted
        ]
    );
}

#[test]
fn complete_session_survives_resume_and_still_rejects_mutations() {
    let fx = fixture(TABLE_AB);
    let mut s = create(&fx, "done", Config::default());
    s.finish().unwrap();
    drop(s);

    let mut resumed = fx.manager.resume("done", order_rng_from_seed(1)).unwrap();
    assert_eq!(resumed.status(), SessionStatus::Complete);
    assert!(matches!(
        resumed.start_comparison(&ids(&["A", "B"]), ComparisonMethod::Pairwise),
        Err(SessionError::InvalidState(_))
    ));
}

#[test]
fn paused_checkpoint_resumes_active() {
    let fx = fixture(TABLE_AB);
    let mut s = create(&fx, "nap", Config::default());
    s.start_comparison(&ids(&["A", "B"]), ComparisonMethod::Pairwise)
        .unwrap();
    s.pause().unwrap();
    drop(s);

    let resumed = fx.manager.resume("nap", order_rng_from_seed(1)).unwrap();
    assert_eq!(resumed.status(), SessionStatus::Active);
}

// ----------------------------- Selection & presentation -----------------------------

#[test]
fn presented_order_is_a_seeded_permutation() {
    let fx = fixture(TABLE_ABC);
    let mut a = create(&fx, "seed-a", Config::default());
    let mut b = create(&fx, "seed-b", Config::default());

    let order_a = a
        .start_comparison(&ids(&["A", "B", "C"]), ComparisonMethod::Trio)
        .unwrap()
        .presented_order
        .clone();
    let order_b = b
        .start_comparison(&ids(&["A", "B", "C"]), ComparisonMethod::Trio)
        .unwrap()
        .presented_order
        .clone();

    // Same seed, same shuffle; always a permutation of the participants.
    assert_eq!(order_a, order_b);
    let mut sorted = order_a.clone();
    sorted.sort();
    assert_eq!(sorted, ids(&["A", "B", "C"]));
}

#[test]
fn selector_prefers_uncompared_pairs() {
    let fx = fixture(TABLE_ABC);
    let mut s = create(&fx, "pick", Config::default());
    s.start_comparison(&ids(&["A", "B"]), ComparisonMethod::Pairwise)
        .unwrap();
    s.complete_comparison(ComparisonOutcome::Winner("A".into()))
        .unwrap();

    let next = s.suggest_next_group().unwrap();
    assert_eq!(next.len(), 2);
    let pair = pe_algo::canonical_pair(&next[0], &next[1]);
    assert_ne!(pair, ("A".to_string(), "B".to_string()));

    let top = s.optimal_matchups(10);
    assert_eq!(top.len(), 3);
}

#[test]
fn convergence_metrics_accumulate() {
    let fx = fixture(TABLE_ABC);
    let mut s = create(&fx, "conv", Config::default());
    s.start_comparison(&ids(&["A", "B"]), ComparisonMethod::Pairwise)
        .unwrap();
    s.complete_comparison(ComparisonOutcome::Winner("A".into()))
        .unwrap();

    let m = s.metrics();
    assert_eq!(m.recent_rating_changes, vec![16.0, 16.0]);
    assert_eq!(m.avg_rating_change, 16.0);
    // One of three possible pairs covered.
    assert!((m.coverage_percentage - 100.0 / 3.0).abs() < 1e-9);
    assert!(!s.should_stop().recommended);
    assert!(!s.should_stop().hard_stop);
}

#[test]
fn duplicate_session_name_rejected() {
    let fx = fixture(TABLE_AB);
    let _s = create(&fx, "dup", Config::default());
    let err = fx
        .manager
        .create("dup", &fx.input, Config::default(), order_rng_from_seed(1))
        .unwrap_err();
    assert!(matches!(err, SessionError::AlreadyExists(_)));
}

#[test]
fn resume_fails_when_source_table_is_gone() {
    let fx = fixture(TABLE_AB);
    let _s = create(&fx, "lost", Config::default());
    fs::remove_file(&fx.input).unwrap();
    let err = fx.manager.resume("lost", order_rng_from_seed(1)).unwrap_err();
    assert!(matches!(err, SessionError::Table(_)));
}

#[test]
fn listing_filters_by_status() {
    let fx = fixture(TABLE_AB);
    let _a = create(&fx, "open", Config::default());
    let mut b = create(&fx, "closed", Config::default());
    b.finish().unwrap();

    let all = fx.manager.list(None).unwrap();
    assert_eq!(all.len(), 2);
    let complete = fx.manager.list(Some(SessionStatus::Complete)).unwrap();
    assert_eq!(complete.len(), 1);
    assert_eq!(complete[0].session_name, "closed");
}
