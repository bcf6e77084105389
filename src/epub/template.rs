//! Document templates. Defaults are embedded from `assets/`; a directory of replacements can be
//! loaded instead.
//!
//! Templates use `{{token}}` placeholders. Every token a document needs must be present, otherwise
//! rendering fails with [TemplateError::Malformed] since the output could not be trusted.

use std::path::{Path, PathBuf};
use thiserror::Error;

pub const CONTAINER_TEMPLATE: &str = "container.xml";
pub const CHAPTER_TEMPLATE: &str = "basic.xhtml";
pub const COVER_TEMPLATE: &str = "cover.xhtml";
pub const AUTHOR_TEMPLATE: &str = "author.xhtml";
pub const TOC_TEMPLATE: &str = "toc.xhtml";
pub const PACKAGE_TEMPLATE: &str = "content.opf";
pub const NAVIGATION_TEMPLATE: &str = "toc.ncx";
pub const STYLESHEET: &str = "RRStyle.css";

/// Substituted for images that could not be fetched.
pub const BROKEN_IMAGE: &[u8] = include_bytes!("../../assets/broken_image.jpg");

#[derive(Debug, Error)]
pub enum TemplateError {
    #[error("Cannot load template {}: {source}", path.display())]
    Missing {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Template {name} is invalid: missing {{{{{element}}}}}")]
    Malformed { name: String, element: String },
}

/// The set of templates used for one book.
#[derive(Debug, Clone)]
pub struct Templates {
    container: String,
    chapter: String,
    cover: String,
    author: String,
    toc: String,
    package: String,
    navigation: String,
    stylesheet: String,
}

impl Templates {
    /// Templates compiled into the binary.
    pub fn embedded() -> Self {
        Self {
            container: include_str!("../../assets/container.xml").to_string(),
            chapter: include_str!("../../assets/basic.xhtml").to_string(),
            cover: include_str!("../../assets/cover.xhtml").to_string(),
            author: include_str!("../../assets/author.xhtml").to_string(),
            toc: include_str!("../../assets/toc.xhtml").to_string(),
            package: include_str!("../../assets/content.opf").to_string(),
            navigation: include_str!("../../assets/toc.ncx").to_string(),
            stylesheet: include_str!("../../assets/RRStyle.css").to_string(),
        }
    }

    /// Load every template from `dir`. A missing file is an error.
    pub fn from_dir(dir: &Path) -> Result<Self, TemplateError> {
        let load = |name: &str| -> Result<String, TemplateError> {
            let path = dir.join(name);
            std::fs::read_to_string(&path).map_err(|source| TemplateError::Missing { path, source })
        };
        Ok(Self {
            container: load(CONTAINER_TEMPLATE)?,
            chapter: load(CHAPTER_TEMPLATE)?,
            cover: load(COVER_TEMPLATE)?,
            author: load(AUTHOR_TEMPLATE)?,
            toc: load(TOC_TEMPLATE)?,
            package: load(PACKAGE_TEMPLATE)?,
            navigation: load(NAVIGATION_TEMPLATE)?,
            stylesheet: load(STYLESHEET)?,
        })
    }

    /// `META-INF/container.xml`, written verbatim.
    pub fn container(&self) -> &str {
        &self.container
    }

    pub fn stylesheet(&self) -> &str {
        &self.stylesheet
    }

    pub fn render_chapter(&self, values: &[(&str, &str)]) -> Result<String, TemplateError> {
        render(CHAPTER_TEMPLATE, &self.chapter, values)
    }

    pub fn render_cover(&self, values: &[(&str, &str)]) -> Result<String, TemplateError> {
        render(COVER_TEMPLATE, &self.cover, values)
    }

    pub fn render_author(&self, values: &[(&str, &str)]) -> Result<String, TemplateError> {
        render(AUTHOR_TEMPLATE, &self.author, values)
    }

    pub fn render_toc(&self, values: &[(&str, &str)]) -> Result<String, TemplateError> {
        render(TOC_TEMPLATE, &self.toc, values)
    }

    pub fn render_package(&self, values: &[(&str, &str)]) -> Result<String, TemplateError> {
        render(PACKAGE_TEMPLATE, &self.package, values)
    }

    pub fn render_navigation(&self, values: &[(&str, &str)]) -> Result<String, TemplateError> {
        render(NAVIGATION_TEMPLATE, &self.navigation, values)
    }
}

impl Default for Templates {
    fn default() -> Self {
        Self::embedded()
    }
}

/// Substitute `{{key}}` tokens in one pass, so substituted values are never rescanned.
/// Unknown tokens are left untouched.
pub fn render(name: &str, source: &str, values: &[(&str, &str)]) -> Result<String, TemplateError> {
    for (key, _) in values {
        if !source.contains(&format!("{{{{{}}}}}", key)) {
            return Err(TemplateError::Malformed {
                name: name.to_string(),
                element: key.to_string(),
            });
        }
    }
    let mut out = String::with_capacity(source.len());
    let mut rest = source;
    while let Some(open) = rest.find("{{") {
        out.push_str(&rest[..open]);
        let after = &rest[open + 2..];
        let Some(close) = after.find("}}") else {
            out.push_str(&rest[open..]);
            return Ok(out);
        };
        let key = &after[..close];
        match values.iter().find(|(k, _)| *k == key) {
            Some((_, value)) => out.push_str(value),
            None => out.push_str(&rest[open..open + 2 + close + 2]),
        }
        rest = &after[close + 2..];
    }
    out.push_str(rest);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn render_substitutes_every_occurrence() -> Result<(), TemplateError> {
        let out = render("t", "<a>{{x}}</a><b>{{x}}</b>{{y}}", &[("x", "1"), ("y", "2")])?;
        assert_eq!(out, "<a>1</a><b>1</b>2");
        Ok(())
    }

    #[test]
    fn render_does_not_rescan_values() -> Result<(), TemplateError> {
        let out = render("t", "{{content}}|{{title}}", &[("content", "{{title}}"), ("title", "T")])?;
        assert_eq!(out, "{{title}}|T");
        Ok(())
    }

    #[test]
    fn render_leaves_unknown_and_unclosed_tokens() -> Result<(), TemplateError> {
        let out = render("t", "{{a}} {{other}} {{open", &[("a", "A")])?;
        assert_eq!(out, "A {{other}} {{open");
        Ok(())
    }

    #[test]
    fn render_missing_token_is_malformed() {
        let err = render("basic.xhtml", "<html><title></title></html>", &[("title", "x")]);
        match err {
            Err(TemplateError::Malformed { name, element }) => {
                assert_eq!(name, "basic.xhtml");
                assert_eq!(element, "title");
            }
            other => panic!("expected Malformed, got {:?}", other),
        }
    }

    #[test]
    fn embedded_templates_render() -> Result<(), TemplateError> {
        let t = Templates::embedded();
        let chapter = t.render_chapter(&[("title", "T"), ("content", "<p>x</p>")])?;
        assert!(chapter.contains("<title>T</title>"));
        assert!(chapter.contains("<p>x</p>"));
        assert!(t.container().contains("OEBPS/content.opf"));
        assert!(!t.stylesheet().is_empty());
        assert!(BROKEN_IMAGE.starts_with(&[0xFF, 0xD8]));
        Ok(())
    }

    #[test]
    fn from_dir_missing_file_errors() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;
        std::fs::write(dir.path().join(CONTAINER_TEMPLATE), "<container/>")?;
        match Templates::from_dir(dir.path()) {
            Err(TemplateError::Missing { path, .. }) => {
                assert!(path.ends_with(CHAPTER_TEMPLATE));
                Ok(())
            }
            other => Err(format!("expected Missing, got {:?}", other.map(|_| ())).into()),
        }
    }

    #[test]
    fn from_dir_loads_overrides() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;
        for name in [
            CONTAINER_TEMPLATE,
            COVER_TEMPLATE,
            AUTHOR_TEMPLATE,
            TOC_TEMPLATE,
            PACKAGE_TEMPLATE,
            NAVIGATION_TEMPLATE,
            STYLESHEET,
        ] {
            std::fs::write(dir.path().join(name), "x")?;
        }
        std::fs::write(
            dir.path().join(CHAPTER_TEMPLATE),
            "<h1>{{title}}</h1>{{content}}",
        )?;
        let t = Templates::from_dir(dir.path())?;
        assert_eq!(
            t.render_chapter(&[("title", "A"), ("content", "B")])?,
            "<h1>A</h1>B"
        );
        Ok(())
    }
}
