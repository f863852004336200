use std::collections::BTreeMap;

use crate::error::Result;
use crate::workflow::WorkflowResult;

use chrono::SecondsFormat;
use serde_json::{json, Value};

/// Render matches as SARIF 2.1.0.
///
/// Every pattern key becomes a rule, every matched file an artifact with its
/// SHA-256 hash, and the run carries a fresh GUID plus the invocation's
/// start and end timestamps.
pub fn render(result: &WorkflowResult, target_name: &str) -> Result<String> {
    let matches = result.matches();

    let mut rule_descriptions: BTreeMap<&str, &str> = BTreeMap::new();
    let mut artifact_hashes: BTreeMap<&str, &str> = BTreeMap::new();
    for m in &matches {
        rule_descriptions.insert(&m.pattern.key, &m.pattern.description);
        artifact_hashes.insert(&m.file.relative_path, &m.file.content_hash);
    }

    let rules: Vec<Value> = rule_descriptions
        .iter()
        .map(|(key, description)| {
            let text = if description.is_empty() { key } else { description };
            json!({
                "id": key,
                "name": key,
                "shortDescription": { "text": text },
                "defaultConfiguration": { "level": "warning" },
            })
        })
        .collect();

    let artifact_index: BTreeMap<&str, usize> = artifact_hashes
        .keys()
        .enumerate()
        .map(|(i, path)| (*path, i))
        .collect();
    let artifacts: Vec<Value> = artifact_hashes
        .iter()
        .map(|(path, hash)| {
            json!({
                "location": { "uri": path },
                "hashes": { "sha-256": hash },
            })
        })
        .collect();

    let results: Vec<Value> = matches
        .iter()
        .map(|m| {
            let dto = m.to_dto();
            let text = if m.pattern.description.is_empty() {
                format!("Pattern {} matched", m.pattern.key)
            } else {
                m.pattern.description.clone()
            };
            json!({
                "ruleId": dto.pattern_key,
                "level": "warning",
                "message": { "text": text },
                "locations": [{
                    "physicalLocation": {
                        "artifactLocation": {
                            "uri": dto.source_file,
                            "index": artifact_index.get(dto.source_file.as_str()),
                        },
                        "region": {
                            "startLine": dto.begin_line,
                            "startColumn": dto.begin_column,
                            "endLine": dto.end_line,
                            "endColumn": dto.end_column,
                            "snippet": { "text": dto.matched_code },
                        },
                    },
                }],
            })
        })
        .collect();

    let mut invocation = json!({
        "executionSuccessful": !result.is_cancelled(),
        "startTimeUtc": result.started_at().to_rfc3339_opts(SecondsFormat::Millis, true),
    });
    if let Some(finished) = result.finished_at() {
        invocation["endTimeUtc"] = json!(finished.to_rfc3339_opts(SecondsFormat::Millis, true));
    }

    let sarif = json!({
        "$schema": "https://docs.oasis-open.org/sarif/sarif/v2.1.0/errata01/os/schemas/sarif-schema-2.1.0.json",
        "version": "2.1.0",
        "runs": [{
            "tool": {
                "driver": {
                    "name": "ustmatch",
                    "version": env!("CARGO_PKG_VERSION"),
                    "semanticVersion": env!("CARGO_PKG_VERSION"),
                    "rules": rules,
                },
            },
            "invocations": [invocation],
            "artifacts": artifacts,
            "results": results,
            "automationDetails": {
                "id": format!("ustmatch/{}", target_name),
                "guid": uuid::Uuid::new_v4().to_string(),
            },
        }],
    });

    let output = serde_json::to_string_pretty(&sarif)?;
    Ok(output)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::output::tests::sample_result;

    #[test]
    fn sarif_has_rules_artifacts_and_regions() {
        let text = render(&sample_result(), "demo").unwrap();
        let sarif: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(sarif["version"], "2.1.0");

        let run = &sarif["runs"][0];
        assert_eq!(run["tool"]["driver"]["rules"][0]["id"], "x5");
        assert_eq!(
            run["tool"]["driver"]["rules"][0]["shortDescription"]["text"],
            "x assigned five"
        );
        assert_eq!(run["artifacts"][0]["location"]["uri"], "src/a.ts");
        assert_eq!(run["artifacts"][0]["hashes"]["sha-256"].as_str().unwrap().len(), 64);

        let region = &run["results"][0]["locations"][0]["physicalLocation"]["region"];
        assert_eq!(region["startLine"], 2);
        assert_eq!(region["endColumn"], 6);
        assert_eq!(run["invocations"][0]["executionSuccessful"], true);
        assert!(uuid::Uuid::parse_str(run["automationDetails"]["guid"].as_str().unwrap()).is_ok());
    }
}
