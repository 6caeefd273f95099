//! Email subject and body rendering

use serde::{Deserialize, Serialize};

use crate::report::{NotifierConfig, Results};

pub const DEFAULT_PRODUCT_NAME: &str = "StackRox";

pub const DEFAULT_SUBJECT_TEMPLATE: &str =
    "{product_name} Compliance Report For {report_name} with {clusters} Cluster(s)";

pub const DEFAULT_BODY_TEMPLATE: &str = "\
{product_name} has scanned your clusters for compliance with the profiles in your selected scan configuration.
The attached report lists those checks and associated details to help with remediation.

Profiles: {profiles}
Passing: {pass} checks
Failing: {fail} checks
Mixed: {mixed} checks
Clusters scanned: {clusters}
";

/// Templates with `{placeholder}` markers filled from the report results
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EmailTemplate {
    pub product_name: String,
    pub subject_template: String,
    pub body_template: String,
}

impl Default for EmailTemplate {
    fn default() -> Self {
        Self {
            product_name: DEFAULT_PRODUCT_NAME.to_string(),
            subject_template: DEFAULT_SUBJECT_TEMPLATE.to_string(),
            body_template: DEFAULT_BODY_TEMPLATE.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedEmail {
    pub subject: String,
    pub body: String,
}

impl EmailTemplate {
    pub fn render(&self, report_name: &str, results: &Results) -> RenderedEmail {
        RenderedEmail {
            subject: self.fill(&self.subject_template, report_name, results),
            body: self.fill(&self.body_template, report_name, results),
        }
    }

    /// Render for one notifier; its non-empty overrides win over the templates
    pub fn render_for(
        &self,
        notifier: &NotifierConfig,
        report_name: &str,
        results: &Results,
    ) -> RenderedEmail {
        let rendered = self.render(report_name, results);
        RenderedEmail {
            subject: pick(&notifier.custom_subject, rendered.subject),
            body: pick(&notifier.custom_body, rendered.body),
        }
    }

    /// Substitute every known `{placeholder}` in one pass. Substituted text is
    /// never scanned again, and unknown markers are kept as written.
    fn fill(&self, template: &str, report_name: &str, results: &Results) -> String {
        let value = |name: &str| -> Option<String> {
            match name {
                "product_name" => Some(self.product_name.clone()),
                "report_name" => Some(report_name.to_string()),
                "profiles" => Some(results.profiles.join(", ")),
                "pass" => Some(results.total_pass.to_string()),
                "fail" => Some(results.total_fail.to_string()),
                "mixed" => Some(results.total_mixed.to_string()),
                "clusters" => Some(results.clusters.to_string()),
                _ => None,
            }
        };

        let mut out = String::with_capacity(template.len());
        let mut rest = template;
        while let Some(open) = rest.find('{') {
            out.push_str(&rest[..open]);
            let tail = &rest[open..];
            let replaced = tail
                .find('}')
                .and_then(|close| value(&tail[1..close]).map(|v| (v, close)));
            match replaced {
                Some((v, close)) => {
                    out.push_str(&v);
                    rest = &tail[close + 1..];
                }
                None => {
                    out.push('{');
                    rest = &tail[1..];
                }
            }
        }
        out.push_str(rest);
        out
    }
}

fn pick(custom: &str, rendered: String) -> String {
    if custom.is_empty() {
        rendered
    } else {
        custom.to_string()
    }
}
