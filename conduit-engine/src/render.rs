//! Manifest rendering
//!
//! Turns a service template into a ready-to-apply multi-document manifest:
//! `{{.key}}` placeholders are substituted from variables, then container
//! images of workload documents are replaced. Rendering is pure.

use conduit_core::domain::environment::{RenderVariableKV, ServiceTemplate};
use regex::Regex;
use serde::Deserialize;
use serde_yaml::Value;
use std::collections::BTreeMap;
use std::sync::LazyLock;

use crate::error::{EngineError, Result};
use crate::values::display_value;

/// Image value used for modules whose image is only known at run time
pub const IMAGE_PLACEHOLDER: &str = "{{ NOT BE RENDERED }}";

static TEMPLATE_KEY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\{\{\s*\.([A-Za-z0-9_][A-Za-z0-9_.\-]*)\s*\}\}").expect("valid template regex")
});

const WORKLOAD_KINDS: [&str; 4] = ["Deployment", "StatefulSet", "Job", "CronJob"];

/// Substitutes `{{.key}}` / `{{ .a.b }}` placeholders; unknown keys are kept
pub fn render_template(template: &str, vars: &BTreeMap<String, String>) -> String {
    TEMPLATE_KEY
        .replace_all(template, |caps: &regex::Captures<'_>| {
            vars.get(&caps[1])
                .cloned()
                .unwrap_or_else(|| caps[0].to_string())
        })
        .into_owned()
}

/// Variable map for template substitution; later entries win
pub fn variable_map<'a>(
    kvs: impl IntoIterator<Item = &'a RenderVariableKV>,
) -> BTreeMap<String, String> {
    kvs.into_iter()
        .map(|kv| (kv.key.clone(), display_value(&kv.value)))
        .collect()
}

/// Replaces container images in every workload document
///
/// `images` maps container name to image. Containers and init containers
/// are both considered.
pub fn replace_container_images(manifest: &str, images: &BTreeMap<String, String>) -> Result<String> {
    if images.is_empty() {
        return Ok(manifest.to_string());
    }

    let mut documents = Vec::new();
    for document in split_documents(manifest)? {
        let mut document = document;
        let kind = document
            .get("kind")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        if WORKLOAD_KINDS.contains(&kind.as_str()) {
            if let Some(pod_spec) = pod_spec_mut(&mut document, &kind) {
                for field in ["containers", "initContainers"] {
                    replace_in_list(pod_spec.get_mut(field), images);
                }
            }
        }
        documents.push(document);
    }
    join_documents(&documents)
}

fn pod_spec_mut<'a>(document: &'a mut Value, kind: &str) -> Option<&'a mut Value> {
    let spec = document.get_mut("spec")?;
    let template_owner = if kind == "CronJob" {
        spec.get_mut("jobTemplate")?.get_mut("spec")?
    } else {
        spec
    };
    template_owner.get_mut("template")?.get_mut("spec")
}

fn replace_in_list(list: Option<&mut Value>, images: &BTreeMap<String, String>) {
    let Some(Value::Sequence(containers)) = list else {
        return;
    };
    for container in containers {
        let name = container
            .get("name")
            .and_then(Value::as_str)
            .map(str::to_string);
        let Some(image) = name.and_then(|name| images.get(&name)) else {
            continue;
        };
        if let Value::Mapping(map) = container {
            map.insert(Value::from("image"), Value::from(image.as_str()));
        }
    }
}

/// Splits a multi-document manifest, dropping empty documents
pub fn split_documents(manifest: &str) -> Result<Vec<Value>> {
    let mut documents = Vec::new();
    for document in serde_yaml::Deserializer::from_str(manifest) {
        let value = Value::deserialize(document)?;
        if !value.is_null() {
            documents.push(value);
        }
    }
    Ok(documents)
}

fn join_documents(documents: &[Value]) -> Result<String> {
    let rendered = documents
        .iter()
        .map(serde_yaml::to_string)
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rendered.join("---\n"))
}

/// Renders a service template
///
/// Variables are applied only when `kvs` is given and images only when
/// `images` is given.
pub fn render_service(
    template: &ServiceTemplate,
    kvs: Option<&[RenderVariableKV]>,
    images: Option<&BTreeMap<String, String>>,
) -> Result<String> {
    if template.yaml.trim().is_empty() {
        return Err(EngineError::validation(format!(
            "service {} has no manifest template",
            template.service_name
        )));
    }

    let mut vars: BTreeMap<String, String> = template
        .variable_kvs
        .iter()
        .map(|kv| (kv.key.clone(), display_value(&kv.value)))
        .collect();
    if let Some(kvs) = kvs {
        vars.extend(variable_map(kvs));
    }

    let rendered = render_template(&template.yaml, &vars);
    match images {
        Some(images) => replace_container_images(&rendered, images),
        None => Ok(rendered),
    }
}
