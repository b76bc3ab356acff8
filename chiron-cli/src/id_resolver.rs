//! ID resolver module
//!
//! Resolves short worker and application references to full identifiers.
//! Worker service ids are long (`<workspace>/<client>:<service>`), so any
//! unambiguous fragment of one is accepted.

use anyhow::{Result, anyhow};
use chiron_core::domain::application::AppKey;
use chiron_session::Session;

/// Resolve a worker reference to a connected worker's service id
///
/// Exact matches win; otherwise the reference must be a substring of
/// exactly one service id.
pub fn resolve_worker(session: &Session, reference: &str) -> Result<String> {
    let ids: Vec<String> = session
        .workers()
        .into_iter()
        .map(|w| w.service_id)
        .collect();
    resolve(&ids, reference, "worker")
}

/// Resolve a trainer reference (`<worker>#<app-id>` or a bare app id)
pub fn resolve_trainer(session: &Session, reference: &str) -> Result<AppKey> {
    let keys: Vec<String> = session
        .trainers()
        .iter()
        .map(|t| t.key().to_string())
        .collect();

    let full = match reference.split_once('#') {
        Some((worker, app_id)) => {
            let worker = resolve_worker(session, worker)?;
            format!("{}#{}", worker, app_id)
        }
        None => {
            let suffix = format!("#{}", reference);
            let matches: Vec<&String> = keys.iter().filter(|k| k.ends_with(&suffix)).collect();
            match matches.as_slice() {
                [only] => (*only).clone(),
                [] => return Err(anyhow!("No trainer found with app id '{}'", reference)),
                _ => {
                    return Err(anyhow!(
                        "Trainer '{}' exists on several workers; use <worker>#<app-id>",
                        reference
                    ));
                }
            }
        }
    };

    let resolved = resolve(&keys, &full, "trainer")?;
    let (worker_id, app_id) = resolved
        .split_once('#')
        .ok_or_else(|| anyhow!("Malformed trainer key '{}'", resolved))?;
    Ok(AppKey::new(worker_id, app_id))
}

fn resolve(candidates: &[String], reference: &str, kind: &str) -> Result<String> {
    if let Some(exact) = candidates.iter().find(|c| c.as_str() == reference) {
        return Ok(exact.clone());
    }

    let matches: Vec<&String> = candidates
        .iter()
        .filter(|c| c.contains(reference))
        .collect();

    match matches.len() {
        0 => Err(anyhow!("No {} matches '{}'", kind, reference)),
        1 => Ok(matches[0].clone()),
        _ => {
            let ids: Vec<&str> = matches.iter().map(|m| m.as_str()).collect();
            Err(anyhow!(
                "Ambiguous reference '{}' matches multiple {}s: {}",
                reference,
                kind,
                ids.join(", ")
            ))
        }
    }
}
