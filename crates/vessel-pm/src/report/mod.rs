//! Resolution reports
//!
//! A resolution report is the XML document a resolution engine leaves behind
//! after resolving a container's dependencies. It lists every resolved
//! module revision with its licenses, callers, downloaded artifacts and
//! eviction status. [`ResolvedForest`] turns the flat list into a forest.

mod forest;

pub use forest::{NodeId, ResolvedForest};

use crate::container::Container;
use crate::ledger::ModuleId;
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, Event};
use quick_xml::{Reader, Writer};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Errors that can occur while reading or writing reports
#[derive(Debug, Error)]
pub enum ReportError {
    /// Failed to read the report
    #[error("Could not read resolution report {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Failed to write the report
    #[error("Could not write resolution report {path}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Malformed XML or unexpected structure
    #[error("Could not parse resolution report: {0}")]
    Malformed(String),

    /// Failed to render XML
    #[error("Could not render resolution report: {0}")]
    Render(String),
}

/// A license attached to a resolved module
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct License {
    pub name: String,
    pub url: String,
}

/// A module revision that asked for a resolved module
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Caller {
    pub group: String,
    pub name: String,

    /// Revision of the caller itself
    pub revision: String,

    /// Revision spec the caller declared
    pub requested: String,
}

/// An artifact reported for a resolved module
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactRef {
    pub name: String,
    pub kind: String,
    pub ext: String,
    pub size: Option<u64>,
    pub status: String,

    /// Local file, present only if the download succeeded
    pub location: Option<PathBuf>,
}

impl ArtifactRef {
    /// True if the artifact was downloaded to a local file
    pub fn is_downloaded(&self) -> bool {
        self.location.is_some()
    }
}

/// One resolved module revision
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ResolvedNode {
    pub group: String,
    pub name: String,
    pub branch: String,
    pub revision: String,
    pub homepage: String,
    pub licenses: Vec<License>,

    /// Eviction reason, if this revision lost a conflict
    pub evicted: Option<String>,
    pub artifacts: Vec<ArtifactRef>,
    pub callers: Vec<Caller>,
}

impl ResolvedNode {
    pub fn new(group: &str, name: &str, revision: &str) -> Self {
        Self {
            group: group.to_string(),
            name: name.to_string(),
            revision: revision.to_string(),
            ..Self::default()
        }
    }

    pub fn is_evicted(&self) -> bool {
        self.evicted.is_some()
    }

    /// True if `caller` refers to this node
    pub fn is_caller(&self, caller: &Caller) -> bool {
        caller.group == self.group && caller.name == self.name && caller.revision == self.revision
    }

    fn identity(&self) -> (&str, &str, &str, &str) {
        (&self.group, &self.name, &self.branch, &self.revision)
    }
}

impl std::fmt::Display for ResolvedNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}:{}", self.group, self.name, self.revision)?;
        if let Some(reason) = &self.evicted {
            write!(f, " (evicted: {})", reason)?;
        }
        Ok(())
    }
}

/// A parsed resolution report
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolutionReport {
    /// The module that was resolved (the container)
    pub module: ModuleId,

    /// Report entries in document order
    pub nodes: Vec<ResolvedNode>,
}

/// Where the last resolution report of a container lives
pub fn report_path(container: &Container, module: &ModuleId) -> PathBuf {
    container
        .cache_file("resolution")
        .join(format!("{}-{}-default.xml", module.group, module.name))
}

impl ResolutionReport {
    pub fn new(module: ModuleId) -> Self {
        Self {
            module,
            nodes: Vec::new(),
        }
    }

    /// Read a report file
    pub fn from_file(path: &Path) -> Result<Self, ReportError> {
        let content = std::fs::read_to_string(path).map_err(|source| ReportError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_str(&content)
    }

    /// Parse a report from XML
    pub fn from_str(content: &str) -> Result<Self, ReportError> {
        let mut reader = Reader::from_str(content);
        reader.config_mut().trim_text(true);

        let mut parser = ReportParser::default();
        loop {
            match reader.read_event() {
                Ok(Event::Start(e)) => parser.open(&e, false)?,
                Ok(Event::Empty(e)) => parser.open(&e, true)?,
                Ok(Event::End(e)) => parser.close(e.name().as_ref()),
                Ok(Event::Eof) => break,
                Ok(_) => {}
                Err(err) => return Err(ReportError::Malformed(err.to_string())),
            }
        }
        parser.finish()
    }

    /// Render the report as XML
    pub fn to_xml(&self) -> Result<String, ReportError> {
        let mut writer = Writer::new_with_indent(Vec::new(), b' ', 2);
        emit(&mut writer, Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))?;

        let mut root = BytesStart::new("resolution-report");
        root.push_attribute(("version", "1"));
        emit(&mut writer, Event::Start(root))?;

        let mut info = BytesStart::new("info");
        info.push_attribute(("organisation", self.module.group.as_str()));
        info.push_attribute(("module", self.module.name.as_str()));
        info.push_attribute(("revision", self.module.revision.as_str()));
        emit(&mut writer, Event::Empty(info))?;

        emit(&mut writer, Event::Start(BytesStart::new("dependencies")))?;

        // Revisions of the same module are grouped, in order of first appearance
        let mut modules: Vec<(&str, &str)> = Vec::new();
        for node in &self.nodes {
            let key = (node.group.as_str(), node.name.as_str());
            if !modules.contains(&key) {
                modules.push(key);
            }
        }

        for (group, name) in modules {
            let mut module = BytesStart::new("module");
            module.push_attribute(("organisation", group));
            module.push_attribute(("name", name));
            emit(&mut writer, Event::Start(module))?;

            for node in self.nodes.iter().filter(|n| n.group == group && n.name == name) {
                write_revision(&mut writer, node)?;
            }

            emit(&mut writer, Event::End(BytesEnd::new("module")))?;
        }

        emit(&mut writer, Event::End(BytesEnd::new("dependencies")))?;
        emit(&mut writer, Event::End(BytesEnd::new("resolution-report")))?;

        String::from_utf8(writer.into_inner()).map_err(|e| ReportError::Render(e.to_string()))
    }

    /// Write the report to a file
    pub fn to_file(&self, path: &Path) -> Result<(), ReportError> {
        let xml = self.to_xml()?;
        crate::ledger::write_atomically(path, xml.as_bytes()).map_err(|source| ReportError::Write {
            path: path.to_path_buf(),
            source,
        })
    }
}

fn write_revision(writer: &mut Writer<Vec<u8>>, node: &ResolvedNode) -> Result<(), ReportError> {
    let mut revision = BytesStart::new("revision");
    revision.push_attribute(("name", node.revision.as_str()));
    revision.push_attribute(("branch", node.branch.as_str()));
    revision.push_attribute(("homepage", node.homepage.as_str()));
    if let Some(reason) = &node.evicted {
        revision.push_attribute(("evicted", reason.as_str()));
    }
    emit(writer, Event::Start(revision))?;

    for license in &node.licenses {
        let mut element = BytesStart::new("license");
        element.push_attribute(("name", license.name.as_str()));
        element.push_attribute(("url", license.url.as_str()));
        emit(writer, Event::Empty(element))?;
    }

    for caller in &node.callers {
        let mut element = BytesStart::new("caller");
        element.push_attribute(("organisation", caller.group.as_str()));
        element.push_attribute(("name", caller.name.as_str()));
        element.push_attribute(("rev", caller.requested.as_str()));
        element.push_attribute(("callerrev", caller.revision.as_str()));
        emit(writer, Event::Empty(element))?;
    }

    emit(writer, Event::Start(BytesStart::new("artifacts")))?;
    for artifact in &node.artifacts {
        let size = artifact.size.map(|s| s.to_string()).unwrap_or_default();
        let location = artifact
            .location
            .as_ref()
            .map(|p| p.to_string_lossy().replace('\\', "/"))
            .unwrap_or_default();

        let mut element = BytesStart::new("artifact");
        element.push_attribute(("name", artifact.name.as_str()));
        element.push_attribute(("type", artifact.kind.as_str()));
        element.push_attribute(("ext", artifact.ext.as_str()));
        element.push_attribute(("size", size.as_str()));
        element.push_attribute(("status", artifact.status.as_str()));
        if artifact.location.is_some() {
            element.push_attribute(("location", location.as_str()));
        }
        emit(writer, Event::Empty(element))?;
    }
    emit(writer, Event::End(BytesEnd::new("artifacts")))?;

    emit(writer, Event::End(BytesEnd::new("revision")))
}

fn emit(writer: &mut Writer<Vec<u8>>, event: Event<'_>) -> Result<(), ReportError> {
    writer
        .write_event(event)
        .map_err(|e| ReportError::Render(e.to_string()))
}

fn attributes(e: &BytesStart<'_>) -> Result<HashMap<String, String>, ReportError> {
    let mut map = HashMap::new();
    for attr in e.attributes() {
        let attr = attr.map_err(|err| ReportError::Malformed(err.to_string()))?;
        let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
        let value = attr
            .unescape_value()
            .map_err(|err| ReportError::Malformed(err.to_string()))?
            .into_owned();
        map.insert(key, value);
    }
    Ok(map)
}

/// Incremental state while walking the XML events
#[derive(Default)]
struct ReportParser {
    seen_root: bool,
    module: Option<ModuleId>,
    in_dependencies: bool,
    current_module: Option<(String, String)>,
    current: Option<ResolvedNode>,
    nodes: Vec<ResolvedNode>,
}

impl ReportParser {
    fn open(&mut self, e: &BytesStart<'_>, empty: bool) -> Result<(), ReportError> {
        let name = e.name();
        match name.as_ref() {
            b"resolution-report" | b"ivy-report" => self.seen_root = true,
            _ if !self.seen_root => {
                return Err(ReportError::Malformed(format!(
                    "unexpected root element <{}>",
                    String::from_utf8_lossy(name.as_ref())
                )))
            }
            b"info" => {
                let mut attrs = attributes(e)?;
                self.module = Some(ModuleId::new(
                    take(&mut attrs, "organisation"),
                    take(&mut attrs, "module"),
                    take(&mut attrs, "revision"),
                ));
            }
            b"dependencies" => self.in_dependencies = !empty,
            b"module" if self.in_dependencies => {
                let mut attrs = attributes(e)?;
                self.current_module =
                    Some((take(&mut attrs, "organisation"), take(&mut attrs, "name")));
            }
            b"revision" => {
                let Some((group, module)) = &self.current_module else {
                    return Err(ReportError::Malformed(
                        "<revision> outside of <module>".to_string(),
                    ));
                };
                let mut attrs = attributes(e)?;
                let mut node = ResolvedNode::new(group, module, &take(&mut attrs, "name"));
                node.branch = take(&mut attrs, "branch");
                node.homepage = take(&mut attrs, "homepage");
                node.evicted = attrs.remove("evicted").filter(|reason| !reason.is_empty());

                if empty {
                    self.nodes.push(node);
                } else {
                    self.current = Some(node);
                }
            }
            b"license" => {
                if let Some(node) = self.current.as_mut() {
                    let mut attrs = attributes(e)?;
                    node.licenses.push(License {
                        name: take(&mut attrs, "name"),
                        url: take(&mut attrs, "url"),
                    });
                }
            }
            b"caller" => {
                if let Some(node) = self.current.as_mut() {
                    let mut attrs = attributes(e)?;
                    node.callers.push(Caller {
                        group: take(&mut attrs, "organisation"),
                        name: take(&mut attrs, "name"),
                        revision: take(&mut attrs, "callerrev"),
                        requested: take(&mut attrs, "rev"),
                    });
                }
            }
            b"artifact" => {
                if let Some(node) = self.current.as_mut() {
                    let mut attrs = attributes(e)?;
                    let size = attrs.get("size").and_then(|s| s.parse().ok());
                    let location = attrs
                        .remove("location")
                        .filter(|l| !l.is_empty())
                        .map(PathBuf::from);
                    node.artifacts.push(ArtifactRef {
                        name: take(&mut attrs, "name"),
                        kind: take(&mut attrs, "type"),
                        ext: take(&mut attrs, "ext"),
                        size,
                        status: take(&mut attrs, "status"),
                        location,
                    });
                }
            }
            _ => {}
        }
        Ok(())
    }

    fn close(&mut self, name: &[u8]) {
        match name {
            b"revision" => {
                if let Some(node) = self.current.take() {
                    self.nodes.push(node);
                }
            }
            b"module" => self.current_module = None,
            b"dependencies" => self.in_dependencies = false,
            _ => {}
        }
    }

    fn finish(self) -> Result<ResolutionReport, ReportError> {
        if !self.seen_root {
            return Err(ReportError::Malformed("empty document".to_string()));
        }
        Ok(ResolutionReport {
            module: self.module.unwrap_or_else(ModuleId::default_container),
            nodes: self.nodes,
        })
    }
}

fn take(attrs: &mut HashMap<String, String>, key: &str) -> String {
    attrs.remove(key).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    const REPORT: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<resolution-report version="1">
  <info organisation="vessel" module="container" revision="working"/>
  <dependencies>
    <module organisation="org.example" name="web">
      <revision name="2.0" branch="" homepage="https://web.example.org">
        <license name="Apache 2.0" url="https://www.apache.org/licenses/LICENSE-2.0"/>
        <caller organisation="vessel" name="container" rev="2.+" callerrev="working"/>
        <artifacts>
          <artifact name="web" type="jar" ext="jar" size="120" status="successful" location="cache/repository/web-2.0.jar"/>
        </artifacts>
      </revision>
    </module>
    <module organisation="org.example" name="util">
      <revision name="1.1" evicted="latest-revision">
        <caller organisation="org.example" name="web" rev="1.1" callerrev="2.0"/>
      </revision>
      <revision name="1.2"/>
    </module>
  </dependencies>
</resolution-report>
"#;

    #[test]
    fn test_parse_report() {
        let report = ResolutionReport::from_str(REPORT).unwrap();
        assert_eq!(report.module, ModuleId::default_container());
        assert_eq!(report.nodes.len(), 3);

        let web = &report.nodes[0];
        assert_eq!(web.group, "org.example");
        assert_eq!(web.revision, "2.0");
        assert_eq!(web.homepage, "https://web.example.org");
        assert_eq!(web.licenses[0].name, "Apache 2.0");
        assert_eq!(web.callers[0].revision, "working");
        assert_eq!(web.callers[0].requested, "2.+");
        assert_eq!(web.artifacts[0].size, Some(120));
        assert_eq!(
            web.artifacts[0].location,
            Some(PathBuf::from("cache/repository/web-2.0.jar"))
        );

        let evicted = &report.nodes[1];
        assert_eq!(evicted.evicted.as_deref(), Some("latest-revision"));
        assert!(evicted.artifacts.is_empty());

        assert_eq!(report.nodes[2].revision, "1.2");
        assert!(!report.nodes[2].is_evicted());
    }

    #[test]
    fn test_render_and_parse_again() {
        let report = ResolutionReport::from_str(REPORT).unwrap();
        let xml = report.to_xml().unwrap();
        let reparsed = ResolutionReport::from_str(&xml).unwrap();
        assert_eq!(report, reparsed);
    }

    #[test]
    fn test_failed_download_has_no_location() {
        let xml = r#"<resolution-report><dependencies><module organisation="g" name="n">
            <revision name="1"><artifacts><artifact name="n" type="jar" ext="jar" status="failed"/></artifacts></revision>
        </module></dependencies></resolution-report>"#;

        let report = ResolutionReport::from_str(xml).unwrap();
        assert!(!report.nodes[0].artifacts[0].is_downloaded());
    }

    #[test]
    fn test_rejects_foreign_document() {
        let result = ResolutionReport::from_str("<project><module/></project>");
        assert!(matches!(result, Err(ReportError::Malformed(_))));
    }

    #[test]
    fn test_rejects_broken_xml() {
        let result = ResolutionReport::from_str("<resolution-report><dependencies></module>");
        assert!(result.is_err());
    }
}
