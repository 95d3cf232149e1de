//! `rename`: replaces an event's name outright, or prepends/appends to it.
//! Resulting-name validity is enforced at template validation, not here.

use async_trait::async_trait;
use cdp_core::dag::StepFunction;
use cdp_core::Event;

pub struct Rename {
    replace: Option<String>,
    prepend: Option<String>,
    append: Option<String>,
}

impl Rename {
    pub fn new(replace: Option<String>, prepend: Option<String>, append: Option<String>) -> Self {
        Self {
            replace,
            prepend,
            append,
        }
    }

    fn rename_one(&self, name: &str) -> String {
        if let Some(replace) = &self.replace {
            return replace.clone();
        }
        let mut out = String::new();
        if let Some(prepend) = &self.prepend {
            out.push_str(prepend);
        }
        out.push_str(name);
        if let Some(append) = &self.append {
            out.push_str(append);
        }
        out
    }
}

#[async_trait]
impl StepFunction for Rename {
    async fn apply(&self, batch: Vec<Event>) -> Vec<Event> {
        batch
            .into_iter()
            .map(|e| {
                let new_name = self.rename_one(&e.name);
                e.with_name(new_name)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ev(name: &str) -> Event {
        Event::new(
            name.to_string(),
            json!(null),
            vec![cdp_core::TracePoint {
                i: 0,
                p: "p".into(),
                h: "h".into(),
            }],
        )
    }

    #[tokio::test]
    async fn prepend_and_append_match_spec_scenario_5() {
        let f = Rename::new(None, Some("prefix.".into()), Some(".suffix".into()));
        let batch = vec![ev("a"), ev("b"), ev("c"), ev("d")];
        let out = f.apply(batch).await;
        let names: Vec<&str> = out.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(
            names,
            vec![
                "prefix.a.suffix",
                "prefix.b.suffix",
                "prefix.c.suffix",
                "prefix.d.suffix"
            ]
        );
    }

    #[tokio::test]
    async fn replace_sets_an_absolute_name() {
        let f = Rename::new(Some("renamed".into()), None, None);
        let out = f.apply(vec![ev("a")]).await;
        assert_eq!(out[0].name, "renamed");
    }
}
