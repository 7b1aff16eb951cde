//! Template resolution and rendering.
//!
//! A template is a directory at `{root}/{channel}/{kind-as-kebab}/{version}`
//! holding one liquid file per named block (`subject.liquid`,
//! `content.liquid`). Rendering is pure apart from reading those files.

use std::collections::HashMap;
use std::path::PathBuf;

use serde_json::{Map, Value};
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;
use time_tz::Tz;
use traineehub_shared::datetime::localise;
use traineehub_shared::{Channel, NotificationKind};

use crate::error::NotifyError;

/// Configured template version per `{kind}.{channel}` pair.
#[derive(Debug, Clone, Default)]
pub struct TemplateVersions(HashMap<String, String>);

impl TemplateVersions {
    pub fn new(map: HashMap<String, String>) -> Self {
        Self(map)
    }

    pub fn key(kind: NotificationKind, channel: Channel) -> String {
        format!("{}.{}", kind.as_path_segment(), channel.as_path_segment())
    }

    pub fn version_of(
        &self,
        kind: NotificationKind,
        channel: Channel,
    ) -> Result<&str, NotifyError> {
        let key = Self::key(kind, channel);
        self.0
            .get(&key)
            .map(String::as_str)
            .ok_or(NotifyError::UnknownTemplateVersion(key))
    }
}

pub struct TemplateRenderer {
    parser: liquid::Parser,
    root: PathBuf,
    timezone: &'static Tz,
}

impl TemplateRenderer {
    pub fn new(root: impl Into<PathBuf>, timezone: &'static Tz) -> Result<Self, NotifyError> {
        let parser = liquid::ParserBuilder::with_stdlib()
            .build()
            .map_err(|err| NotifyError::Template(err.to_string()))?;

        Ok(Self {
            parser,
            root: root.into(),
            timezone,
        })
    }

    /// `{channel}/{kind-as-kebab}/{version}`, relative to the template root.
    pub fn template_path(channel: Channel, kind: NotificationKind, version: &str) -> String {
        format!(
            "{}/{}/{}",
            channel.as_path_segment(),
            kind.as_path_segment(),
            version
        )
    }

    /// Renders the named blocks of a template; with no selectors every block
    /// is rendered in filename order.
    pub fn process(
        &self,
        path: &str,
        selectors: &[&str],
        variables: &Map<String, Value>,
    ) -> Result<String, NotifyError> {
        let dir = self.root.join(path);
        let files: Vec<PathBuf> = if selectors.is_empty() {
            let mut files: Vec<PathBuf> = std::fs::read_dir(&dir)
                .map_err(|err| {
                    NotifyError::Template(format!("template {path} unavailable: {err}"))
                })?
                .filter_map(|entry| entry.ok().map(|e| e.path()))
                .filter(|p| p.extension().is_some_and(|ext| ext == "liquid"))
                .collect();
            files.sort();
            files
        } else {
            selectors
                .iter()
                .map(|selector| dir.join(format!("{selector}.liquid")))
                .collect()
        };

        let globals = self.globals(variables)?;
        let mut blocks = Vec::with_capacity(files.len());

        for file in files {
            let source = std::fs::read_to_string(&file).map_err(|err| {
                NotifyError::Template(format!("block {} unavailable: {err}", file.display()))
            })?;
            let template = self
                .parser
                .parse(&source)
                .map_err(|err| NotifyError::Template(err.to_string()))?;
            let rendered = template
                .render(&globals)
                .map_err(|err| NotifyError::Template(err.to_string()))?;
            blocks.push(rendered);
        }

        Ok(blocks.join("\n"))
    }

    fn globals(&self, variables: &Map<String, Value>) -> Result<liquid::Object, NotifyError> {
        let mut object = liquid::Object::new();
        for (key, value) in variables {
            let localised = self.localise_instants(value.clone());
            let value = liquid::model::to_value(&localised)
                .map_err(|err| NotifyError::Template(err.to_string()))?;
            object.insert(key.clone().into(), value);
        }

        Ok(object)
    }

    /// Rewrites every RFC 3339 instant in the variable tree into the
    /// configured zone, so templates always see local times.
    fn localise_instants(&self, value: Value) -> Value {
        match value {
            Value::String(text) => match OffsetDateTime::parse(&text, &Rfc3339) {
                Ok(instant) => {
                    let local = localise(instant, self.timezone);
                    Value::String(local.format(&Rfc3339).unwrap_or(text))
                }
                Err(_) => Value::String(text),
            },
            Value::Array(items) => Value::Array(
                items
                    .into_iter()
                    .map(|item| self.localise_instants(item))
                    .collect(),
            ),
            Value::Object(map) => Value::Object(
                map.into_iter()
                    .map(|(key, item)| (key, self.localise_instants(item)))
                    .collect(),
            ),
            other => other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use temp_dir::TempDir;
    use traineehub_shared::datetime::find_zone;

    fn renderer(dir: &TempDir) -> TemplateRenderer {
        TemplateRenderer::new(dir.path(), find_zone("Europe/London").unwrap()).unwrap()
    }

    fn write_template(dir: &TempDir, path: &str, block: &str, source: &str) {
        let dir = dir.path().join(path);
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join(format!("{block}.liquid")), source).unwrap();
    }

    #[test]
    fn template_paths_follow_the_convention() {
        assert_eq!(
            TemplateRenderer::template_path(
                Channel::Email,
                NotificationKind::LtftSubmitted,
                "v1.0.0"
            ),
            "email/ltft-submitted/v1.0.0"
        );
        assert_eq!(
            TemplateRenderer::template_path(Channel::InApp, NotificationKind::DayOne, "v2.1.0"),
            "in-app/day-one/v2.1.0"
        );
    }

    #[test]
    fn renders_selected_blocks_with_variables() {
        let dir = TempDir::new().unwrap();
        write_template(&dir, "email/welcome/v1.0.0", "subject", "Welcome {{ givenName }}");
        write_template(&dir, "email/welcome/v1.0.0", "content", "Hello {{ givenName }}!");

        let renderer = renderer(&dir);
        let mut variables = Map::new();
        variables.insert("givenName".to_string(), "Jan".into());

        let subject = renderer
            .process("email/welcome/v1.0.0", &["subject"], &variables)
            .unwrap();
        assert_eq!(subject, "Welcome Jan");
    }

    #[test]
    fn empty_selectors_render_every_block_in_order() {
        let dir = TempDir::new().unwrap();
        write_template(&dir, "in-app/day-one/v1.0.0", "content", "body");
        write_template(&dir, "in-app/day-one/v1.0.0", "subject", "title");

        let renderer = renderer(&dir);
        let whole = renderer
            .process("in-app/day-one/v1.0.0", &[], &Map::new())
            .unwrap();
        assert_eq!(whole, "body\ntitle");
    }

    #[test]
    fn instants_are_localised_before_rendering() {
        let dir = TempDir::new().unwrap();
        write_template(&dir, "email/day-one/v1.0.0", "content", "{{ startDate }}");

        let renderer = renderer(&dir);
        let mut variables = Map::new();
        // Midnight London on 1 July 2025 is 23:00 UTC the day before.
        variables.insert("startDate".to_string(), "2025-06-30T23:00:00Z".into());

        let rendered = renderer
            .process("email/day-one/v1.0.0", &["content"], &variables)
            .unwrap();
        assert_eq!(rendered, "2025-07-01T00:00:00+01:00");
    }

    #[test]
    fn missing_block_is_a_template_error() {
        let dir = TempDir::new().unwrap();
        write_template(&dir, "email/welcome/v1.0.0", "content", "hi");

        let renderer = renderer(&dir);
        let err = renderer
            .process("email/welcome/v1.0.0", &["subject"], &Map::new())
            .unwrap_err();
        assert!(matches!(err, NotifyError::Template(_)));
    }

    #[test]
    fn versions_are_looked_up_by_kind_and_channel() {
        let mut map = HashMap::new();
        map.insert("ltft-submitted.email".to_string(), "v1.2.0".to_string());
        let versions = TemplateVersions::new(map);

        assert_eq!(
            versions
                .version_of(NotificationKind::LtftSubmitted, Channel::Email)
                .unwrap(),
            "v1.2.0"
        );
        assert!(matches!(
            versions.version_of(NotificationKind::Welcome, Channel::Email),
            Err(NotifyError::UnknownTemplateVersion(_))
        ));
    }
}
