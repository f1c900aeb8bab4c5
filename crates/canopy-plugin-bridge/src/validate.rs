//! Runtime shape validation for untrusted plugin return values.
//!
//! Plugin answers are plain JSON with optional fields. Before the host acts
//! on one — builds a dropdown, applies a location query, shows a title — the
//! value must pass the declared [`Shape`] for its hook. A failing value is
//! treated as "no opinion" (absent), never as a host-level exception.
//!
//! Shapes are composable predicates, not a schema language: records check
//! required and optional fields, arrays check every element, unions accept
//! the first matching alternative. Records are open — unknown extra fields
//! are allowed, since the catalog is append-only.

use serde_json::Value;

use crate::capabilities::Mode;

/// A composable runtime type predicate.
#[derive(Debug, Clone)]
pub enum Shape {
    /// Accepts anything, including null.
    Any,
    Null,
    Bool,
    String,
    Number,
    /// Number with no fractional part (ranks, heights).
    Integer,
    /// Array whose every element matches the inner shape.
    ArrayOf(Box<Shape>),
    /// Open record: required fields must be present and match; optional
    /// fields must match when present (null counts as absent).
    Record(Vec<Field>),
    /// Accepts a value matching any alternative.
    OneOf(Vec<Shape>),
}

/// One field of a [`Shape::Record`].
#[derive(Debug, Clone)]
pub struct Field {
    pub name: &'static str,
    pub shape: Shape,
    pub required: bool,
}

impl Field {
    pub fn required(name: &'static str, shape: Shape) -> Self {
        Self {
            name,
            shape,
            required: true,
        }
    }

    pub fn optional(name: &'static str, shape: Shape) -> Self {
        Self {
            name,
            shape,
            required: false,
        }
    }
}

impl Shape {
    pub fn array_of(inner: Shape) -> Self {
        Shape::ArrayOf(Box::new(inner))
    }

    /// Check `value` against this shape.
    pub fn validate(&self, value: &Value) -> bool {
        match self {
            Shape::Any => true,
            Shape::Null => value.is_null(),
            Shape::Bool => value.is_boolean(),
            Shape::String => value.is_string(),
            Shape::Number => value.is_number(),
            Shape::Integer => value.is_i64() || value.is_u64(),
            Shape::ArrayOf(inner) => match value.as_array() {
                Some(items) => items.iter().all(|item| inner.validate(item)),
                None => false,
            },
            Shape::Record(fields) => match value.as_object() {
                Some(map) => fields.iter().all(|field| match map.get(field.name) {
                    Some(v) if !v.is_null() => field.shape.validate(v),
                    // Null is treated as absent, same as a missing key.
                    _ => !field.required,
                }),
                None => false,
            },
            Shape::OneOf(alternatives) => alternatives.iter().any(|alt| alt.validate(value)),
        }
    }
}

/// Shape of a single dropdown action descriptor.
pub fn dropdown_action() -> Shape {
    Shape::Record(vec![
        Field::required("id", Shape::String),
        Field::required("label", Shape::String),
        Field::optional("icon", Shape::String),
        Field::optional("rank", Shape::Integer),
        Field::optional("group", Shape::String),
        Field::optional("active", Shape::Bool),
        Field::optional("disabled", Shape::Bool),
        Field::optional("parameters", Shape::Any),
    ])
}

/// Shape of an action group: a labelled container of actions.
pub fn dropdown_action_group() -> Shape {
    Shape::Record(vec![
        Field::required("label", Shape::String),
        Field::optional("icon", Shape::String),
        Field::optional("rank", Shape::Integer),
        Field::required("actions", Shape::array_of(dropdown_action())),
    ])
}

/// Shape of a "list actions" hook answer: actions and groups, mixed.
pub fn dropdown_actions_answer() -> Shape {
    Shape::array_of(Shape::OneOf(vec![dropdown_action(), dropdown_action_group()]))
}

/// Shape of a `buildItemPresentationInfo` answer.
pub fn item_presentation_info() -> Shape {
    Shape::Record(vec![
        Field::required("title", Shape::String),
        Field::optional("imageUrl", Shape::String),
        Field::optional("rank", Shape::Integer),
    ])
}

/// Shape of an `initialLocationQueryForItemSelector` answer.
pub fn location_query() -> Shape {
    Shape::Record(vec![
        Field::optional("locale", Shape::String),
        Field::optional("filter", Shape::Any),
        Field::optional("rank", Shape::Integer),
    ])
}

/// Shape of an `assetSources` answer.
pub fn asset_sources_answer() -> Shape {
    Shape::array_of(Shape::Record(vec![
        Field::required("id", Shape::String),
        Field::required("name", Shape::String),
        Field::optional("icon", Shape::String),
        Field::optional("modal", Shape::Any),
    ]))
}

/// Shape of a `mainNavigationTabs` answer.
pub fn navigation_tabs_answer() -> Shape {
    Shape::array_of(Shape::Record(vec![
        Field::required("label", Shape::String),
        Field::required("pointsTo", Shape::Any),
        Field::optional("icon", Shape::String),
        Field::optional("rank", Shape::Integer),
        Field::optional("placement", Shape::String),
    ]))
}

/// The declared return shape for a hook mode, or `None` when the return
/// value is ignored (render and execute hooks, `onBoot`).
pub fn return_shape(mode: Mode) -> Option<Shape> {
    match mode {
        Mode::ItemsDropdownActions | Mode::FieldDropdownActions => Some(dropdown_actions_answer()),
        Mode::BuildItemPresentationInfo => Some(item_presentation_info()),
        Mode::InitialLocationQueryForItemSelector => Some(location_query()),
        Mode::AssetSources => Some(asset_sources_answer()),
        Mode::MainNavigationTabs => Some(navigation_tabs_answer()),
        Mode::OnBoot
        | Mode::RenderConfigScreen
        | Mode::RenderFieldExtension
        | Mode::RenderItemFormSidebarPanel
        | Mode::RenderModal
        | Mode::RenderPage
        | Mode::ExecuteItemsDropdownAction
        | Mode::ExecuteFieldDropdownAction => None,
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    // -------------------------------------------------------------------------
    // primitive shapes
    // -------------------------------------------------------------------------

    #[test]
    fn primitives() {
        assert!(Shape::String.validate(&json!("x")));
        assert!(!Shape::String.validate(&json!(1)));
        assert!(Shape::Integer.validate(&json!(5)));
        assert!(!Shape::Integer.validate(&json!(5.5)));
        assert!(Shape::Number.validate(&json!(5.5)));
        assert!(Shape::Any.validate(&Value::Null));
    }

    #[test]
    fn array_of_checks_every_element() {
        let shape = Shape::array_of(Shape::String);
        assert!(shape.validate(&json!(["a", "b"])));
        assert!(!shape.validate(&json!(["a", 2])));
        assert!(!shape.validate(&json!("not an array")));
    }

    #[test]
    fn record_required_and_optional() {
        let shape = Shape::Record(vec![
            Field::required("id", Shape::String),
            Field::optional("rank", Shape::Integer),
        ]);
        assert!(shape.validate(&json!({"id": "a"})));
        assert!(shape.validate(&json!({"id": "a", "rank": 3})));
        assert!(!shape.validate(&json!({"rank": 3})));
        assert!(!shape.validate(&json!({"id": "a", "rank": "high"})));
    }

    #[test]
    fn record_treats_null_as_absent() {
        let shape = Shape::Record(vec![
            Field::required("id", Shape::String),
            Field::optional("icon", Shape::String),
        ]);
        assert!(shape.validate(&json!({"id": "a", "icon": null})));
        assert!(!shape.validate(&json!({"id": null})));
    }

    #[test]
    fn record_is_open_to_unknown_fields() {
        let shape = Shape::Record(vec![Field::required("id", Shape::String)]);
        assert!(shape.validate(&json!({"id": "a", "futureField": 42})));
    }

    // -------------------------------------------------------------------------
    // hook answer shapes
    // -------------------------------------------------------------------------

    #[test]
    fn dropdown_answer_accepts_actions_and_groups() {
        let value = json!([
            {"id": "publish", "label": "Publish", "rank": 1},
            {"label": "Export", "actions": [{"id": "csv", "label": "As CSV"}]},
        ]);
        assert!(dropdown_actions_answer().validate(&value));
    }

    #[test]
    fn dropdown_answer_rejects_action_without_id() {
        let value = json!([{"label": "Publish"}]);
        assert!(!dropdown_actions_answer().validate(&value));
    }

    #[test]
    fn presentation_info_requires_title() {
        assert!(item_presentation_info().validate(&json!({"title": "Post #12"})));
        assert!(!item_presentation_info().validate(&json!({"imageUrl": "x.png"})));
    }

    #[test]
    fn return_shape_absent_for_render_hooks() {
        assert!(return_shape(Mode::RenderFieldExtension).is_none());
        assert!(return_shape(Mode::ItemsDropdownActions).is_some());
    }
}
