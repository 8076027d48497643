use glimpse_agent::capture::{capture, CompileFn};
use glimpse_agent::config::CaptureConfig;
use glimpse_agent::model::Reference;
use glimpse_inspect::{
    FrameSlot, InspectorError, InspectorValue, MockInspectorClient, ObjectKind, ObjectRef,
    PausedFrame, PropertyRead, PropertySlot,
};
use pretty_assertions::assert_eq;
use regex::Regex;

fn object(id: u64, class_name: &str, kind: ObjectKind) -> InspectorValue {
    InspectorValue::Object(ObjectRef {
        id,
        class_name: class_name.to_string(),
        kind,
    })
}

fn data(name: &str, value: InspectorValue) -> PropertySlot {
    PropertySlot {
        name: name.to_string(),
        read: PropertyRead::Value(value),
    }
}

fn frame(locals: Vec<FrameSlot>) -> PausedFrame {
    PausedFrame {
        id: 1,
        function_name: "foo".to_string(),
        script: "/app/lib/foo.js".to_string(),
        line: 1,
        column: 0,
        arguments: Vec::new(),
        locals,
    }
}

fn slot(name: &str, value: InspectorValue) -> FrameSlot {
    FrameSlot {
        name: name.to_string(),
        value,
    }
}

#[test]
fn captures_locals_with_property_truncation() {
    let mut mock = MockInspectorClient::new();
    mock.insert_object(
        10,
        vec![
            data("0", InspectorValue::Number(1.0)),
            data("1", InspectorValue::String("hi".to_string())),
            data("2", InspectorValue::Boolean(true)),
            data("length", InspectorValue::Number(3.0)),
        ],
    );
    mock.insert_object(11, vec![data("k", InspectorValue::Number(7.0))]);

    let config = CaptureConfig {
        max_properties: 1,
        ..CaptureConfig::default()
    };
    let frames = [frame(vec![
        slot("n", InspectorValue::Number(2.0)),
        slot("A", object(10, "Array", ObjectKind::Array { length: 3 })),
        slot("B", object(11, "Object", ObjectKind::Plain)),
    ])];

    let outcome = capture(&mut mock, &config, &frames, &[], None);

    let locals = &outcome.stack_frames[0].locals;
    let names: Vec<&str> = locals.iter().filter_map(|v| v.name.as_deref()).collect();
    assert_eq!(names, vec!["n", "A", "B"]);
    assert_eq!(locals[0].value.as_deref(), Some("2"));

    let a_index = locals[1].var_table_index.expect("A interned");
    let a_entry = &outcome.variable_table[a_index];
    assert_eq!(a_entry.members.len(), 2);
    let marker = a_entry.members[1].name.as_deref().unwrap();
    let marker_re = Regex::new("Only first.*maxProperties=1").unwrap();
    assert!(marker_re.is_match(marker), "unexpected marker: {marker}");
}

#[test]
fn shared_objects_are_interned_once() {
    let mut mock = MockInspectorClient::new();
    mock.insert_object(20, vec![data("v", InspectorValue::Number(1.0))]);

    let frames = [frame(vec![
        slot("x", object(20, "Object", ObjectKind::Plain)),
        slot("y", object(20, "Object", ObjectKind::Plain)),
    ])];
    let outcome = capture(&mut mock, &CaptureConfig::default(), &frames, &[], None);

    let locals = &outcome.stack_frames[0].locals;
    assert_eq!(locals[0].var_table_index, locals[1].var_table_index);
    assert_eq!(outcome.variable_table.len(), 1);
}

#[test]
fn cyclic_graphs_terminate() {
    let mut mock = MockInspectorClient::new();
    mock.insert_object(
        30,
        vec![data("self", object(30, "Object", ObjectKind::Plain))],
    );

    let frames = [frame(vec![slot(
        "node",
        object(30, "Object", ObjectKind::Plain),
    )])];
    let outcome = capture(&mut mock, &CaptureConfig::default(), &frames, &[], None);

    let index = outcome.stack_frames[0].locals[0]
        .var_table_index
        .expect("interned");
    let entry = &outcome.variable_table[index];
    assert_eq!(entry.members[0].var_table_index, Some(index));
}

#[test]
fn long_strings_are_truncated_with_a_status() {
    let mut mock = MockInspectorClient::new();
    let config = CaptureConfig {
        max_string_length: 5,
        ..CaptureConfig::default()
    };
    let frames = [frame(vec![slot(
        "s",
        InspectorValue::String("abcdefgh".to_string()),
    )])];

    let outcome = capture(&mut mock, &config, &frames, &[], None);

    let s = &outcome.stack_frames[0].locals[0];
    assert_eq!(s.value.as_deref(), Some("abcde..."));
    let status = s.status.as_ref().expect("truncation status");
    assert!(!status.is_error);
    assert!(status.description.format.contains("maxStringLength=5"));
    assert!(status.description.format.contains("length 8"));
}

#[test]
fn byte_budget_stops_descent() {
    let mut mock = MockInspectorClient::new();
    mock.insert_object(
        40,
        vec![
            data("aaaaaaaa", InspectorValue::String("bbbbbbbb".to_string())),
            data("cccccccc", InspectorValue::String("dddddddd".to_string())),
            data("eeeeeeee", InspectorValue::String("ffffffff".to_string())),
        ],
    );

    let config = CaptureConfig {
        max_data_size: 20,
        ..CaptureConfig::default()
    };
    let frames = [frame(vec![slot(
        "big",
        object(40, "Object", ObjectKind::Plain),
    )])];
    let outcome = capture(&mut mock, &config, &frames, &[], None);

    let index = outcome.stack_frames[0].locals[0]
        .var_table_index
        .expect("interned");
    let entry = &outcome.variable_table[index];
    assert!(entry.members.len() < 3, "descent should stop early");
    let status = entry.status.as_ref().expect("budget status");
    assert!(status.is_error);
    assert_eq!(status.description.format, "Max data size reached");
}

#[test]
fn deep_frames_report_stubs_instead_of_locals() {
    let mut mock = MockInspectorClient::new();
    let config = CaptureConfig {
        max_frames: 2,
        max_expand_frames: 1,
        ..CaptureConfig::default()
    };
    let frames = [
        frame(vec![slot("n", InspectorValue::Number(1.0))]),
        frame(vec![slot("m", InspectorValue::Number(2.0))]),
        frame(vec![slot("k", InspectorValue::Number(3.0))]),
    ];

    let outcome = capture(&mut mock, &config, &frames, &[], None);
    assert_eq!(outcome.stack_frames.len(), 2);

    let expanded = &outcome.stack_frames[0];
    assert_eq!(expanded.locals[0].name.as_deref(), Some("n"));

    let stubbed = &outcome.stack_frames[1];
    assert_eq!(stubbed.locals[0].name.as_deref(), Some("locals"));
    let status = stubbed.locals[0].status.as_ref().expect("stub status");
    assert!(status.description.format.contains("maxExpandFrames=1"));
    assert!(stubbed.locals[0].value.is_none());
}

#[test]
fn accessor_and_throwing_properties_become_error_children() {
    let mut mock = MockInspectorClient::new();
    mock.insert_object(
        50,
        vec![
            PropertySlot {
                name: "lazy".to_string(),
                read: PropertyRead::Accessor,
            },
            PropertySlot {
                name: "broken".to_string(),
                read: PropertyRead::Threw("boom".to_string()),
            },
        ],
    );

    let frames = [frame(vec![slot(
        "obj",
        object(50, "Object", ObjectKind::Plain),
    )])];
    let outcome = capture(&mut mock, &CaptureConfig::default(), &frames, &[], None);

    let index = outcome.stack_frames[0].locals[0].var_table_index.unwrap();
    let members = &outcome.variable_table[index].members;
    assert!(members[0].value.is_none());
    assert!(members[0].status.as_ref().unwrap().is_error);
    assert_eq!(
        members[1].status.as_ref().unwrap().description.format,
        "boom"
    );
}

#[test]
fn watch_expressions_keep_order_and_skip_top_level_limits() {
    let mut mock = MockInspectorClient::new();
    mock.insert_object(
        60,
        vec![
            data("a", InspectorValue::Number(1.0)),
            data("b", InspectorValue::Number(2.0)),
            data("c", InspectorValue::Number(3.0)),
        ],
    );
    mock.set_evaluation(
        1,
        "bag",
        Ok(object(60, "Object", ObjectKind::Plain)),
    );
    let long = "x".repeat(500);
    mock.set_evaluation(1, "s", Ok(InspectorValue::String(long.clone())));

    let config = CaptureConfig {
        max_properties: 1,
        max_string_length: 10,
        ..CaptureConfig::default()
    };
    let frames = [frame(Vec::new())];
    let expressions = vec!["bag".to_string(), "x = 1".to_string(), "s".to_string()];

    let outcome = capture(&mut mock, &config, &frames, &expressions, None);
    assert_eq!(outcome.evaluated_expressions.len(), 3);

    // Top-level watch object is not capped by max_properties.
    let bag = &outcome.evaluated_expressions[0];
    assert_eq!(bag.name.as_deref(), Some("bag"));
    assert_eq!(bag.members.len(), 3);

    // Invalid watch fails alone; the others still evaluate.
    let invalid = &outcome.evaluated_expressions[1];
    let status = invalid.status.as_ref().expect("validation status");
    assert!(status.is_error);
    assert_eq!(status.refers_to, Reference::BreakpointExpression);
    assert_eq!(status.description.format, "Expression not allowed");

    // Top-level watch strings are not truncated.
    let s = &outcome.evaluated_expressions[2];
    assert_eq!(s.value.as_deref(), Some(long.as_str()));
}

#[test]
fn compile_hook_failures_surface_per_expression() {
    let mut mock = MockInspectorClient::new();
    let compile: CompileFn = Box::new(|_| Err("no transpiler".to_string()));
    let frames = [frame(Vec::new())];
    let expressions = vec!["n + 1".to_string()];

    let outcome = capture(
        &mut mock,
        &CaptureConfig::default(),
        &frames,
        &expressions,
        Some(&compile),
    );

    let status = outcome.evaluated_expressions[0]
        .status
        .as_ref()
        .expect("compile status");
    assert_eq!(status.description.format, "Error Compiling Expression");
    assert_eq!(status.refers_to, Reference::BreakpointExpression);
}

#[test]
fn method_call_watches_never_reach_the_debuggee() {
    let mut mock = MockInspectorClient::new();
    let frames = [frame(Vec::new())];
    let expressions = vec!["item.increasePriceByOne()".to_string()];

    let outcome = capture(
        &mut mock,
        &CaptureConfig::default(),
        &frames,
        &expressions,
        None,
    );

    let status = outcome.evaluated_expressions[0]
        .status
        .as_ref()
        .expect("rejection status");
    assert!(status.is_error);
    assert!(mock.eval_calls.is_empty(), "expression must not be evaluated");
}

#[test]
fn runtime_side_effect_rejection_is_per_expression() {
    let mut mock = MockInspectorClient::new();
    mock.set_evaluation(
        1,
        "item.price",
        Err(InspectorError::SideEffect("getter writes".to_string())),
    );

    let frames = [frame(Vec::new())];
    let expressions = vec!["item.price".to_string()];
    let outcome = capture(
        &mut mock,
        &CaptureConfig::default(),
        &frames,
        &expressions,
        None,
    );

    let status = outcome.evaluated_expressions[0]
        .status
        .as_ref()
        .expect("side-effect status");
    assert!(status.is_error);
    assert_eq!(status.refers_to, Reference::VariableValue);

    // The evaluation ran with the debugger's side-effect guard on.
    assert_eq!(mock.eval_calls.len(), 1);
    assert!(mock.eval_calls[0].2);
}
