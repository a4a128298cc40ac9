use super::dates::DateFormatter;
use super::sanitize::{sanitize_filename, sanitize_property_name};
use crate::clients::types::{
    plain_text, Database, FormulaValue, Page, PropertyKind, PropertyValue, RollupValue,
};
use crate::Result;
use serde::Serialize;
use serde_yaml::Value;
use std::collections::BTreeMap;

/// Vault-side type of a database field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    Text,
    Number,
    List,
    Date,
    Checkbox,
    Datetime,
}

impl From<&PropertyKind> for FieldType {
    fn from(kind: &PropertyKind) -> Self {
        match kind {
            PropertyKind::Number => FieldType::Number,
            PropertyKind::MultiSelect
            | PropertyKind::Relation
            | PropertyKind::People
            | PropertyKind::Files => FieldType::List,
            PropertyKind::Date => FieldType::Date,
            PropertyKind::Checkbox => FieldType::Checkbox,
            PropertyKind::CreatedTime | PropertyKind::LastEditedTime => FieldType::Datetime,
            _ => FieldType::Text,
        }
    }
}

#[derive(Debug, Clone)]
pub struct FieldMapping {
    pub name: String,
    pub field_type: FieldType,
    pub is_title: bool,
}

/// Field mapping for one database, keyed by the upstream property name.
#[derive(Debug, Clone)]
pub struct DatabaseSchema {
    pub title: String,
    pub fields: BTreeMap<String, FieldMapping>,
    pub title_field: Option<String>,
}

impl DatabaseSchema {
    pub fn from_database(database: &Database) -> Self {
        let mut fields = BTreeMap::new();
        let mut title_field = None;

        for (name, schema) in &database.properties {
            let is_title = schema.kind == PropertyKind::Title;
            if is_title {
                title_field = Some(name.clone());
            }
            fields.insert(
                name.clone(),
                FieldMapping {
                    name: name.clone(),
                    field_type: FieldType::from(&schema.kind),
                    is_title,
                },
            );
        }

        Self {
            title: database.title(),
            fields,
            title_field,
        }
    }

    fn is_title(&self, name: &str) -> bool {
        self.title_field.as_deref() == Some(name)
    }

    fn field_type(&self, name: &str) -> Option<FieldType> {
        self.fields.get(name).map(|f| f.field_type)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct FilterGroup {
    pub and: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ViewColumn {
    pub property: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ViewOrder {
    pub property: String,
    pub order: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct View {
    #[serde(rename = "type")]
    pub kind: String,
    pub name: String,
    pub columns: Vec<ViewColumn>,
    pub order: Vec<ViewOrder>,
}

/// The `.base` sidecar describing a database folder as a table view.
#[derive(Debug, Clone, Serialize)]
pub struct BaseFile {
    pub filters: FilterGroup,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub display: BTreeMap<String, String>,
    pub views: Vec<View>,
}

impl BaseFile {
    pub fn new(schema: &DatabaseSchema, folder: &str) -> Self {
        let display = schema
            .fields
            .keys()
            .map(|name| (sanitize_property_name(name), name.clone()))
            .collect();

        let mut columns = vec![ViewColumn {
            property: "file.name".to_string(),
        }];
        // fields is a BTreeMap, so columns come out sorted
        columns.extend(
            schema
                .fields
                .values()
                .filter(|f| !f.is_title)
                .map(|f| ViewColumn {
                    property: sanitize_property_name(&f.name),
                }),
        );

        Self {
            filters: FilterGroup {
                and: vec![
                    format!("file.inFolder(\"{}\")", folder),
                    "file.ext == \"md\"".to_string(),
                ],
            },
            display,
            views: vec![View {
                kind: "table".to_string(),
                name: "Table".to_string(),
                columns,
                order: vec![ViewOrder {
                    property: "file.name".to_string(),
                    order: "asc".to_string(),
                }],
            }],
        }
    }

    pub fn to_yaml(&self) -> Result<String> {
        Ok(serde_yaml::to_string(self)?)
    }
}

/// Front-matter material for one database entry.
#[derive(Debug, Clone)]
pub struct EntryData {
    pub page_id: String,
    pub title: String,
    pub properties: BTreeMap<String, Value>,
}

impl EntryData {
    pub fn from_page(page: &Page, schema: &DatabaseSchema, dates: &DateFormatter) -> Self {
        let mut title = String::new();
        let mut properties = BTreeMap::new();

        for (name, value) in &page.properties {
            if schema.is_title(name) || matches!(value, PropertyValue::Title { .. }) {
                if let PropertyValue::Title { title: segments } = value {
                    title = plain_text(segments);
                }
                continue;
            }
            let Some(v) = property_value(value, dates) else {
                continue;
            };
            let v = match schema.field_type(name) {
                Some(field_type) => coerce(v, field_type),
                None => v,
            };
            properties.insert(sanitize_property_name(name), v);
        }

        Self {
            page_id: page.id.clone(),
            title,
            properties,
        }
    }

    /// `---\n<yaml>---\n`, or empty when there is nothing but the title.
    pub fn front_matter(&self) -> Result<String> {
        if self.properties.is_empty() {
            return Ok(String::new());
        }
        let mut map = self.properties.clone();
        map.insert("notion_id".to_string(), Value::String(self.page_id.clone()));
        Ok(format!("---\n{}---\n", serde_yaml::to_string(&map)?))
    }

    /// `sanitize(title).md`, falling back to the page id.
    pub fn filename(&self) -> String {
        entry_filename(&self.title, &self.page_id)
    }
}

pub fn entry_filename(title: &str, id: &str) -> String {
    let name = sanitize_filename(title);
    if name.is_empty() {
        format!("{}.md", id)
    } else {
        format!("{}.md", name)
    }
}

fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(match (n.as_i64(), n.as_f64()) {
            (Some(i), _) => i.to_string(),
            (None, Some(f)) => f.to_string(),
            _ => n.to_string(),
        }),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// Shapes a converted value to the vault type of its field.
fn coerce(value: Value, field_type: FieldType) -> Value {
    match (field_type, value) {
        (FieldType::Text | FieldType::Date | FieldType::Datetime, Value::Sequence(items)) => {
            let parts: Vec<String> = items.iter().filter_map(scalar_text).collect();
            Value::String(parts.join(", "))
        }
        (FieldType::Text | FieldType::Date | FieldType::Datetime, value) => {
            match scalar_text(&value) {
                Some(text) => Value::String(text),
                None => value,
            }
        }
        (FieldType::List, Value::Sequence(items)) => Value::Sequence(items),
        (FieldType::List, value) => Value::Sequence(vec![value]),
        (_, value) => value,
    }
}

fn string_list(items: Vec<String>) -> Option<Value> {
    if items.is_empty() {
        None
    } else {
        Some(Value::Sequence(items.into_iter().map(Value::String).collect()))
    }
}

fn non_empty(s: Option<&String>) -> Option<Value> {
    s.filter(|s| !s.is_empty()).map(|s| Value::String(s.clone()))
}

fn number(n: f64) -> Value {
    Value::Number(serde_yaml::Number::from(n))
}

fn property_value(value: &PropertyValue, dates: &DateFormatter) -> Option<Value> {
    match value {
        PropertyValue::Title { title: text } | PropertyValue::RichText { rich_text: text } => {
            Some(Value::String(plain_text(text)))
        }
        PropertyValue::Number { number: n } => n.map(number),
        PropertyValue::Select { select: opt } | PropertyValue::Status { status: opt } => {
            non_empty(opt.as_ref().map(|o| &o.name))
        }
        PropertyValue::MultiSelect { multi_select } => {
            string_list(multi_select.iter().map(|o| o.name.clone()).collect())
        }
        PropertyValue::Date { date } => date
            .as_ref()
            .filter(|d| !d.start.is_empty())
            .map(|d| Value::String(dates.format_range(d))),
        PropertyValue::Checkbox { checkbox } => Some(Value::Bool(*checkbox)),
        PropertyValue::Url { url: s }
        | PropertyValue::Email { email: s }
        | PropertyValue::PhoneNumber { phone_number: s } => non_empty(s.as_ref()),
        PropertyValue::Relation { relation } => string_list(
            relation
                .iter()
                .map(|r| format!("[[{}]]", r.id))
                .collect(),
        ),
        PropertyValue::People { people } => {
            string_list(people.iter().filter_map(|u| u.name.clone()).collect())
        }
        PropertyValue::Files { files } => string_list(
            files
                .iter()
                .filter_map(|f| f.url())
                .filter(|u| !u.is_empty())
                .map(str::to_string)
                .collect(),
        ),
        PropertyValue::Formula { formula } => match formula {
            FormulaValue::String { string } => non_empty(string.as_ref()),
            FormulaValue::Number { number: n } => n.map(number),
            FormulaValue::Boolean { boolean } => boolean.map(Value::Bool),
            FormulaValue::Date { date } => {
                date.as_ref().map(|d| Value::String(dates.format(&d.start)))
            }
            FormulaValue::Unsupported => None,
        },
        PropertyValue::Rollup { rollup } => match rollup {
            RollupValue::Number { number: n } => n.map(number),
            RollupValue::Date { date } => {
                date.as_ref().map(|d| Value::String(dates.format(&d.start)))
            }
            RollupValue::Array { array } => {
                let values: Vec<Value> = array
                    .iter()
                    .filter_map(|item| property_value(item, dates))
                    .collect();
                (!values.is_empty()).then_some(Value::Sequence(values))
            }
            RollupValue::Unsupported => None,
        },
        PropertyValue::CreatedTime { created_time: t }
        | PropertyValue::LastEditedTime { last_edited_time: t } => {
            Some(Value::String(t.clone()))
        }
        PropertyValue::CreatedBy { created_by: u }
        | PropertyValue::LastEditedBy { last_edited_by: u } => u.name.clone().map(Value::String),
        PropertyValue::Unsupported => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn database() -> Database {
        serde_json::from_value(serde_json::json!({
            "id": "db-1",
            "title": [{"plain_text": "Tasks"}],
            "last_edited_time": "2024-01-15T10:00:00.000Z",
            "parent": {"type": "workspace", "workspace": true},
            "properties": {
                "Name": {"id": "title", "name": "Name", "type": "title"},
                "Due Date": {"id": "a", "name": "Due Date", "type": "date"},
                "Tags": {"id": "b", "name": "Tags", "type": "multi_select"},
                "Done": {"id": "c", "name": "Done", "type": "checkbox"},
                "Blocked By": {"id": "d", "name": "Blocked By", "type": "relation"},
                "Weird": {"id": "e", "name": "Weird", "type": "button"}
            }
        }))
        .unwrap()
    }

    fn entry(properties: serde_json::Value) -> Page {
        serde_json::from_value(serde_json::json!({
            "id": "page-1",
            "last_edited_time": "2024-01-15T10:00:00.000Z",
            "parent": {"type": "database_id", "database_id": "db-1"},
            "properties": properties
        }))
        .unwrap()
    }

    #[test]
    fn test_schema_mapping() {
        let schema = DatabaseSchema::from_database(&database());
        assert_eq!(schema.title, "Tasks");
        assert_eq!(schema.title_field.as_deref(), Some("Name"));
        assert_eq!(schema.fields["Due Date"].field_type, FieldType::Date);
        assert_eq!(schema.fields["Tags"].field_type, FieldType::List);
        assert_eq!(schema.fields["Done"].field_type, FieldType::Checkbox);
        assert_eq!(schema.fields["Blocked By"].field_type, FieldType::List);
        assert_eq!(schema.fields["Weird"].field_type, FieldType::Text);
    }

    #[test]
    fn test_base_file_layout() {
        let schema = DatabaseSchema::from_database(&database());
        let yaml = BaseFile::new(&schema, "Tasks").to_yaml().unwrap();
        let parsed: Value = serde_yaml::from_str(&yaml).unwrap();

        assert_eq!(
            parsed["filters"]["and"][0].as_str(),
            Some("file.inFolder(\"Tasks\")")
        );
        assert_eq!(parsed["filters"]["and"][1].as_str(), Some("file.ext == \"md\""));
        assert_eq!(parsed["display"]["due_date"].as_str(), Some("Due Date"));

        let view = &parsed["views"][0];
        assert_eq!(view["type"].as_str(), Some("table"));
        assert_eq!(view["name"].as_str(), Some("Table"));
        let columns: Vec<&str> = view["columns"]
            .as_sequence()
            .unwrap()
            .iter()
            .filter_map(|c| c["property"].as_str())
            .collect();
        assert_eq!(
            columns,
            vec!["file.name", "blocked_by", "done", "due_date", "tags", "weird"]
        );
        assert_eq!(view["order"][0]["property"].as_str(), Some("file.name"));
        assert_eq!(view["order"][0]["order"].as_str(), Some("asc"));
    }

    #[test]
    fn test_front_matter() {
        let schema = DatabaseSchema::from_database(&database());
        let page = entry(serde_json::json!({
            "Name": {"type": "title", "title": [{"plain_text": "Write docs"}]},
            "Due Date": {"type": "date", "date": {"start": "2024-02-01", "end": null}},
            "Tags": {"type": "multi_select", "multi_select": [{"name": "a"}, {"name": "b"}]},
            "Done": {"type": "checkbox", "checkbox": false},
            "Blocked By": {"type": "relation", "relation": [{"id": "other"}]}
        }));

        let data = EntryData::from_page(&page, &schema, &DateFormatter::default());
        assert_eq!(data.title, "Write docs");
        assert_eq!(data.filename(), "Write docs.md");

        let fm = data.front_matter().unwrap();
        assert!(fm.starts_with("---\n"));
        assert!(fm.ends_with("---\n"));
        let body = fm.trim_start_matches("---\n").trim_end_matches("---\n");
        let yaml: Value = serde_yaml::from_str(body).unwrap();
        assert_eq!(yaml["notion_id"].as_str(), Some("page-1"));
        assert_eq!(yaml["due_date"].as_str(), Some("01-02-2024"));
        assert_eq!(yaml["tags"][1].as_str(), Some("b"));
        assert_eq!(yaml["done"].as_bool(), Some(false));
        assert_eq!(yaml["blocked_by"][0].as_str(), Some("[[other]]"));
        assert!(yaml.get("name").is_none());
    }

    #[test]
    fn test_values_follow_field_types() {
        let mut database = database();
        let extra = serde_json::json!({
            "Score": {"id": "f", "name": "Score", "type": "formula"},
            "Created": {"id": "g", "name": "Created", "type": "created_time"}
        });
        for (name, schema) in extra.as_object().unwrap() {
            database
                .properties
                .insert(name.clone(), serde_json::from_value(schema.clone()).unwrap());
        }
        let schema = DatabaseSchema::from_database(&database);
        assert_eq!(schema.fields["Created"].field_type, FieldType::Datetime);

        let page = entry(serde_json::json!({
            "Name": {"type": "title", "title": [{"plain_text": "Scored"}]},
            "Score": {"type": "formula", "formula": {"type": "number", "number": 42}},
            "Created": {"type": "created_time", "created_time": "2024-01-15T10:00:00.000Z"},
            "Done": {"type": "checkbox", "checkbox": true}
        }));
        let data = EntryData::from_page(&page, &schema, &DateFormatter::default());

        assert_eq!(data.title, "Scored");
        assert_eq!(data.properties["score"].as_str(), Some("42"));
        assert_eq!(
            data.properties["created"].as_str(),
            Some("2024-01-15T10:00:00.000Z")
        );
        assert_eq!(data.properties["done"].as_bool(), Some(true));
    }

    #[test]
    fn test_coerce() {
        let list = Value::Sequence(vec![Value::String("a".into()), number(2.0)]);
        assert_eq!(coerce(list.clone(), FieldType::Text), Value::String("a, 2".into()));
        assert_eq!(coerce(list.clone(), FieldType::List), list);
        assert_eq!(
            coerce(Value::String("x".into()), FieldType::List),
            Value::Sequence(vec![Value::String("x".into())])
        );
        assert_eq!(coerce(Value::Bool(true), FieldType::Checkbox), Value::Bool(true));
    }

    #[test]
    fn test_title_only_entry_has_no_front_matter() {
        let schema = DatabaseSchema::from_database(&database());
        let page = entry(serde_json::json!({
            "Name": {"type": "title", "title": []}
        }));
        let data = EntryData::from_page(&page, &schema, &DateFormatter::default());
        assert_eq!(data.front_matter().unwrap(), "");
        assert_eq!(data.filename(), "page-1.md");
    }
}
