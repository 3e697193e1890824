//! `tracex match`: shows which tags the trace rules select.

use tracex_filter::TagFilter;

use crate::settings::{override_rules, resolve_config};
use crate::{GlobalArgs, MatchArgs};

/// Runs the `tracex match` command.
///
/// Prints one line per tag: `trace` or `skip`, a tab, and the tag. Returns
/// exit code 0.
pub fn run(args: &MatchArgs, global: &GlobalArgs) -> Result<i32, Box<dyn std::error::Error>> {
    let mut config = resolve_config(global)?;
    override_rules(&mut config, &args.include, &args.exclude);
    let filter = TagFilter::new(&config.trace.include, &config.trace.exclude)?;

    for line in render(&filter, &args.tags) {
        println!("{line}");
    }
    Ok(0)
}

fn render(filter: &TagFilter, tags: &[String]) -> Vec<String> {
    tags.iter()
        .map(|tag| {
            let verdict = if filter.matches(tag) { "trace" } else { "skip" };
            format!("{verdict}\t{tag}")
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verdict_per_tag() {
        let filter = TagFilter::new([r"com\.app\..*"], [".*#<init>"]).unwrap();
        let tags = vec![
            "com.app.Foo#bar".to_string(),
            "com.app.Foo#<init>".to_string(),
            "com.lib.Baz#qux".to_string(),
        ];
        assert_eq!(
            render(&filter, &tags),
            vec![
                "trace\tcom.app.Foo#bar",
                "skip\tcom.app.Foo#<init>",
                "skip\tcom.lib.Baz#qux",
            ]
        );
    }
}
