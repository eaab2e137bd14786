#![no_main]

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use tether_core::{Template, Value};

#[derive(Arbitrary, Debug)]
struct Input {
    text: String,
    numbers: Vec<f64>,
    strings: Vec<String>,
}

fuzz_target!(|input: Input| {
    let Ok(template) = Template::parse(input.text.as_str()) else {
        return;
    };

    let tokens = template.tokens();
    for (i, token) in tokens.iter().enumerate() {
        assert!(!tokens[..i].contains(token), "duplicate token {token}");
    }
    if template.is_static() {
        assert!(tokens.is_empty());
    }
    if let Some((path, _)) = template.single_path() {
        assert_eq!(tokens, [path.to_owned()]);
    }

    let values: Vec<Value> = input
        .numbers
        .iter()
        .copied()
        .map(Value::from)
        .chain(input.strings.iter().map(|s| Value::from(s.as_str())))
        .take(tokens.len())
        .collect();
    let _ = template.apply(&values);
    let _ = template.apply_with(|_| Value::Undefined);
});
