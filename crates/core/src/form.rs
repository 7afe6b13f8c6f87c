//! Renderer-agnostic description of a script's run form.
//!
//! Built purely from the parameter declaration and metadata; the HTTP layer
//! turns it into whatever widgets it uses.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::params::{ParamSchema, ParamSpec, ParamType};
use crate::script::ScriptMetadata;

pub const DATA_FIELDSET: &str = "Script Data";
pub const EXECUTION_FIELDSET: &str = "Script Execution Parameters";

pub const FIELD_SCHEDULE_AT: &str = "_schedule_at";
pub const FIELD_INTERVAL: &str = "_interval";
pub const FIELD_TASK_QUEUE: &str = "_task_queue";
pub const FIELD_COMMIT: &str = "_commit";

/// Named group of form fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fieldset {
    pub name: String,
    pub fields: Vec<String>,
}

impl Fieldset {
    pub fn new(name: impl Into<String>, fields: Vec<String>) -> Self {
        Self {
            name: name.into(),
            fields,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Widget {
    Checkbox,
    Number,
    Text,
    TextArea,
    Select,
    SelectMultiple,
    DateTime,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FormField {
    pub name: String,
    pub label: String,
    pub help_text: Option<String>,
    pub widget: Widget,
    pub required: bool,
    pub initial: Option<Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub choices: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FormSpec {
    pub fields: Vec<FormField>,
    pub fieldsets: Vec<Fieldset>,
}

impl FormSpec {
    /// Describe the run form of a script.
    ///
    /// `task_queues` are the choices offered for `_task_queue`; `initial`
    /// pre-fills parameter fields (see [`ParamSchema::initial_from_input`]).
    pub fn build(
        params: &ParamSchema,
        meta: &ScriptMetadata,
        task_queues: &[String],
        initial: Option<&Map<String, Value>>,
    ) -> Self {
        let ordered = params.ordered(meta.field_order.as_deref());

        let mut fields: Vec<FormField> = ordered
            .iter()
            .map(|spec| param_field(spec, initial.and_then(|i| i.get(&spec.name))))
            .collect();

        let mut fieldsets = match &meta.fieldsets {
            Some(declared) if !declared.is_empty() => declared.clone(),
            _ => vec![Fieldset::new(
                DATA_FIELDSET,
                ordered.iter().map(|p| p.name.clone()).collect(),
            )],
        };

        let mut exec_fields = Vec::new();
        if meta.scheduling_enabled {
            fields.push(FormField {
                name: FIELD_SCHEDULE_AT.into(),
                label: "Schedule at".into(),
                help_text: Some("Schedule execution of script to a set time".into()),
                widget: Widget::DateTime,
                required: false,
                initial: None,
                choices: Vec::new(),
            });
            fields.push(FormField {
                name: FIELD_INTERVAL.into(),
                label: "Recurs every".into(),
                help_text: Some("Interval at which this script is re-run (in minutes)".into()),
                widget: Widget::Number,
                required: false,
                initial: None,
                choices: Vec::new(),
            });
            exec_fields.extend([FIELD_SCHEDULE_AT.to_string(), FIELD_INTERVAL.to_string()]);
        }
        fields.push(FormField {
            name: FIELD_TASK_QUEUE.into(),
            label: "Task queue".into(),
            help_text: Some("The script will be run on the chosen queue".into()),
            widget: Widget::Select,
            required: false,
            initial: task_queues.first().cloned().map(Value::String),
            choices: task_queues.to_vec(),
        });
        fields.push(FormField {
            name: FIELD_COMMIT.into(),
            label: "Commit changes".into(),
            help_text: Some("Commit changes to the database (uncheck for a dry-run)".into()),
            widget: Widget::Checkbox,
            required: false,
            initial: Some(Value::Bool(meta.commit_default)),
            choices: Vec::new(),
        });
        exec_fields.extend([FIELD_TASK_QUEUE.to_string(), FIELD_COMMIT.to_string()]);
        fieldsets.push(Fieldset::new(EXECUTION_FIELDSET, exec_fields));

        Self { fields, fieldsets }
    }

    pub fn field(&self, name: &str) -> Option<&FormField> {
        self.fields.iter().find(|f| f.name == name)
    }
}

fn param_field(spec: &ParamSpec, initial: Option<&Value>) -> FormField {
    let (widget, choices) = match &spec.kind {
        ParamType::Boolean => (Widget::Checkbox, Vec::new()),
        ParamType::Integer { .. } | ParamType::Decimal { .. } => (Widget::Number, Vec::new()),
        ParamType::String { .. } | ParamType::IpAddress => (Widget::Text, Vec::new()),
        ParamType::Text => (Widget::TextArea, Vec::new()),
        ParamType::Choice { choices } => (Widget::Select, choices.clone()),
        ParamType::MultiChoice { choices } => (Widget::SelectMultiple, choices.clone()),
    };
    FormField {
        name: spec.name.clone(),
        label: spec.display_label(),
        help_text: spec.description.clone(),
        widget,
        required: spec.is_required(),
        initial: initial.cloned().or_else(|| spec.default.clone()),
        choices,
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn params() -> ParamSchema {
        ParamSchema(vec![
            ParamSpec::new("site", ParamType::Text),
            ParamSpec::new("verbose", ParamType::Boolean),
        ])
    }

    fn names(fieldset: &Fieldset) -> Vec<&str> {
        fieldset.fields.iter().map(String::as_str).collect()
    }

    #[test]
    fn default_fieldsets_include_scheduling() {
        let form = FormSpec::build(&params(), &ScriptMetadata::default(), &["default".into()], None);
        assert_eq!(form.fieldsets.len(), 2);
        assert_eq!(form.fieldsets[0].name, DATA_FIELDSET);
        assert_eq!(names(&form.fieldsets[0]), ["site", "verbose"]);
        assert_eq!(form.fieldsets[1].name, EXECUTION_FIELDSET);
        assert_eq!(
            names(&form.fieldsets[1]),
            ["_schedule_at", "_interval", "_task_queue", "_commit"]
        );
    }

    #[test]
    fn scheduling_disabled_drops_schedule_fields() {
        let meta = ScriptMetadata {
            scheduling_enabled: false,
            commit_default: false,
            ..ScriptMetadata::default()
        };
        let form = FormSpec::build(&params(), &meta, &["high".into(), "low".into()], None);
        assert_eq!(names(&form.fieldsets[1]), ["_task_queue", "_commit"]);
        assert!(form.field(FIELD_SCHEDULE_AT).is_none());
        assert_eq!(form.field(FIELD_COMMIT).unwrap().initial, Some(json!(false)));
        assert_eq!(form.field(FIELD_TASK_QUEUE).unwrap().choices, ["high", "low"]);
    }

    #[test]
    fn declared_fieldsets_replace_script_data() {
        let meta = ScriptMetadata {
            fieldsets: Some(vec![Fieldset::new("Target", vec!["site".into()])]),
            ..ScriptMetadata::default()
        };
        let form = FormSpec::build(&params(), &meta, &[], None);
        assert_eq!(form.fieldsets[0].name, "Target");
        assert_eq!(form.fieldsets[1].name, EXECUTION_FIELDSET);
    }

    #[test]
    fn initial_values_prefill_fields() {
        let initial = params().initial_from_input(json!({"site": "ams1"}).as_object().unwrap());
        let form = FormSpec::build(&params(), &ScriptMetadata::default(), &[], Some(&initial));
        assert_eq!(form.field("site").unwrap().initial, Some(json!("ams1")));
        assert_eq!(form.field("verbose").unwrap().initial, Some(json!(false)));
        assert_eq!(form.field("verbose").unwrap().widget, Widget::Checkbox);
    }
}
