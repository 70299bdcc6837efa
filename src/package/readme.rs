//! Bundle README generation.

use std::collections::BTreeMap;
use std::sync::LazyLock;

use regex::{Captures, Regex};

use crate::core::profile::{TargetClass, TargetProfile};

static PLACEHOLDER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{\{(\w+)\}\}").expect("placeholder pattern is valid"));

const TEMPLATE: &str = "\
# {{project}} for {{display_name}}

{{description}}

| | |
|---|---|
| Target | `{{target}}` |
| Architecture | {{architecture}} |
| Float ABI | {{float_abi}} |
| Compiler | `{{compiler}}` |
| Flags | `{{compile_flags}}` |

## Contents

{{contents}}

## Running

{{runtime}}
";

/// Substitute `{{key}}` placeholders. Unknown keys are left as written.
pub fn render(template: &str, values: &BTreeMap<&str, String>) -> String {
    PLACEHOLDER
        .replace_all(template, |caps: &Captures<'_>| {
            values
                .get(&caps[1])
                .cloned()
                .unwrap_or_else(|| caps[0].to_string())
        })
        .into_owned()
}

/// Recommended capture settings for the device class.
fn runtime_block(binary: &str, class: TargetClass) -> String {
    let (args, note) = match class {
        TargetClass::Constrained => (
            "-W 640 -H 480 -F 15",
            "Single-core boards: keep to VGA at 15 fps and avoid transcoding.",
        ),
        TargetClass::Balanced => ("-W 1280 -H 720 -F 25", "720p at 25 fps."),
        TargetClass::Capable => ("-W 1920 -H 1080 -F 30", "1080p at 30 fps."),
    };
    format!(
        "{}\n\n```sh\n./{} {} /dev/video0\n```\n",
        note, binary, args
    )
}

/// Inputs describing what ended up in the bundle.
#[derive(Debug, Clone, Default)]
pub struct ReadmeContents {
    pub primary: String,
    pub secondary: Option<String>,
    pub resources: Vec<String>,
    pub native_package: Option<String>,
}

pub fn generate(project: &str, profile: &TargetProfile, contents: &ReadmeContents) -> String {
    let mut lines = vec![format!("- `{}`: primary binary", contents.primary)];
    if let Some(secondary) = &contents.secondary {
        lines.push(format!("- `{}`: secondary binary", secondary));
    }
    for resource in &contents.resources {
        lines.push(format!("- `{}`", resource));
    }
    if let Some(pkg) = &contents.native_package {
        lines.push(format!("- `{}`: native package", pkg));
    }

    let values = BTreeMap::from([
        ("project", project.to_string()),
        ("display_name", profile.display_name.clone()),
        ("description", profile.description.clone()),
        ("target", profile.id.to_string()),
        ("architecture", profile.architecture.to_string()),
        (
            "float_abi",
            profile
                .float_abi
                .map(|f| f.to_string())
                .unwrap_or_else(|| "n/a".to_string()),
        ),
        ("compiler", profile.compiler.c.clone()),
        ("compile_flags", profile.compile_flags.join(" ")),
        ("contents", lines.join("\n")),
        ("runtime", runtime_block(&contents.primary, profile.class)),
    ]);

    render(TEMPLATE, &values)
}
