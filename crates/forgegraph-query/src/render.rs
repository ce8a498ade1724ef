use forgegraph_label::BuildInput;

/// The human-facing string form of a declared input, used by the `graph`
/// export's `srcs`/`tools`/`data` fields. Deliberately distinct from
/// [`BuildInput::paths`], which only resolves the file-backed variants —
/// this renders every variant, including the ones that resolve to no path
/// at all.
pub fn input_repr(input: &BuildInput) -> String {
    match input {
        BuildInput::FileInput { package, file } => format!("{package}/{file}"),
        BuildInput::LabelInput(label) => label.to_string(),
        BuildInput::SystemInput { absolute_path } => absolute_path.clone(),
        BuildInput::AnnotatedLabelInput { label, annotation } => format!("{label}|{annotation}"),
    }
}
