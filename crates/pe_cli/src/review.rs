// crates/pe_cli/src/review.rs
//
// The line-driven comparison loop shared by `start` and `resume`. Reads one
// command per round from stdin so the whole flow scripts cleanly:
//
//   <winner-id>            decide a pairwise round
//   <id> <id> [<id>...]    full ranking, best first (trio/quartet; commas ok)
//   skip [reason]          skip the round without rating changes
//   done                   pause the session and exit
//   finish                 mark the session complete and exit
//
// EOF behaves like `done`.

use std::io::BufRead;

use pe_session::{ComparisonOutcome, Session, SessionError};

use crate::errors::Failure;

pub fn run_review_loop(
    session: &mut Session,
    input: &mut dyn BufRead,
    quiet: bool,
) -> Result<(), Failure> {
    loop {
        if session.should_stop().hard_stop {
            println!(
                "propelo: comparison limit reached ({}); stopping",
                session.total_comparisons()
            );
            if session.status() == pe_core::SessionStatus::Active {
                session.pause().map_err(Failure::from)?;
            }
            return Ok(());
        }

        let Some(group) = session.suggest_next_group() else {
            println!("propelo: not enough proposals for further comparisons");
            return Ok(());
        };
        let method = session.config().comparison_mode;
        let presented = session
            .start_comparison(&group, method)
            .map_err(Failure::from)?
            .presented_order
            .clone();

        println!();
        println!("Compare ({}):", method.as_str());
        for (i, id) in presented.iter().enumerate() {
            if let Some(p) = session.proposal(id) {
                println!("  [{}] {} — {} ({:.0})", i + 1, p.id, p.title, p.score);
            }
        }
        if method.group_size() == 2 {
            println!("winner id, or: skip [reason] | done | finish");
        } else {
            println!("ranking best-first ({} ids), or: skip [reason] | done | finish", method.group_size());
        }

        let mut line = String::new();
        let n = input.read_line(&mut line).map_err(|e| {
            Failure::file(format!("cannot read from stdin: {e}"))
        })?;
        let line = line.trim().to_string();

        if n == 0 || line == "done" {
            session.cancel_comparison().map_err(Failure::from)?;
            session.pause().map_err(Failure::from)?;
            if !quiet {
                println!("propelo: session paused after {} comparison(s)", session.total_comparisons());
            }
            return Ok(());
        }
        if line == "finish" {
            session.cancel_comparison().map_err(Failure::from)?;
            session.finish().map_err(Failure::from)?;
            if !quiet {
                println!("propelo: session complete after {} comparison(s)", session.total_comparisons());
            }
            return Ok(());
        }

        let outcome = parse_outcome(&line, method.group_size());
        match session.complete_comparison(outcome) {
            Ok(done) => {
                if !quiet {
                    if done.skipped {
                        println!("skipped");
                    } else {
                        for u in &done.updates {
                            println!("  {}: {:.0} -> {:.0} ({:+.1})", u.proposal_id, u.old_rating, u.new_rating, u.delta);
                        }
                    }
                }
            }
            Err(SessionError::Comparison(e)) => {
                // A typo should not end the review; the round stays active
                // only for outcome errors, so restate and retry next loop.
                println!("propelo: {e}");
                session.cancel_comparison().map_err(Failure::from)?;
                continue;
            }
            Err(other) => return Err(other.into()),
        }

        let stop = session.should_stop();
        if stop.recommended && !quiet {
            let m = session.metrics();
            println!(
                "propelo: ranking looks stable (convergence {:.2}, coverage {:.0}%); `done` or `finish` to stop",
                m.convergence_score, m.coverage_percentage
            );
        }
    }
}

fn parse_outcome(line: &str, group_size: usize) -> ComparisonOutcome {
    if let Some(rest) = line.strip_prefix("skip") {
        let reason = rest.trim();
        return ComparisonOutcome::Skipped {
            reason: (!reason.is_empty()).then(|| reason.to_string()),
        };
    }
    let ids: Vec<String> = line
        .split(|c: char| c == ',' || c.is_whitespace())
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect();
    match (group_size, ids.as_slice()) {
        (2, [winner]) => ComparisonOutcome::Winner(winner.clone()),
        _ => ComparisonOutcome::Rankings(ids),
    }
}
