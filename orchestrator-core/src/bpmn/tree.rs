//! Minimal namespace-aware XML element tree, built once from the raw
//! document so the validator can walk it (and re-walk it for the
//! supplemental metadata passes) without re-parsing.

use quick_xml::events::{BytesStart, Event};
use quick_xml::name::ResolveResult;
use quick_xml::reader::NsReader;

pub struct Element {
    pub namespace: Option<String>,
    pub local: String,
    pub attrs: Vec<(String, String)>,
    pub children: Vec<Element>,
    pub text: String,
}

impl Element {
    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attrs
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    /// Visit this element and every descendant, preorder.
    pub fn for_each<'a>(&'a self, f: &mut impl FnMut(&'a Element)) {
        f(self);
        for child in &self.children {
            child.for_each(f);
        }
    }
}

pub fn parse_tree(xml: &str) -> Result<Element, ()> {
    let mut reader = NsReader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut stack: Vec<Element> = Vec::new();
    let mut root: Option<Element> = None;
    let mut buf = Vec::new();

    loop {
        let (ns, event) = reader.read_resolved_event_into(&mut buf).map_err(|_| ())?;
        match event {
            Event::Start(ref e) => {
                stack.push(build_element(ns, e)?);
            }
            Event::Empty(ref e) => {
                close(&mut stack, &mut root, build_element(ns, e)?);
            }
            Event::End(_) => {
                let el = stack.pop().ok_or(())?;
                close(&mut stack, &mut root, el);
            }
            Event::Text(ref e) => {
                if let Some(top) = stack.last_mut() {
                    let text = e.unescape().map_err(|_| ())?;
                    top.text.push_str(&text);
                }
            }
            Event::CData(ref e) => {
                if let Some(top) = stack.last_mut() {
                    let text = String::from_utf8_lossy(e.as_ref()).into_owned();
                    top.text.push_str(&text);
                }
            }
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }

    root.ok_or(())
}

fn close(stack: &mut Vec<Element>, root: &mut Option<Element>, el: Element) {
    match stack.last_mut() {
        Some(parent) => parent.children.push(el),
        None => *root = Some(el),
    }
}

fn build_element(ns: ResolveResult, e: &BytesStart) -> Result<Element, ()> {
    let namespace = match ns {
        ResolveResult::Bound(ns) => Some(String::from_utf8_lossy(ns.as_ref()).into_owned()),
        _ => None,
    };
    let local = String::from_utf8_lossy(e.local_name().as_ref()).into_owned();

    let mut attrs = Vec::new();
    for attr in e.attributes() {
        let attr = attr.map_err(|_| ())?;
        let key = String::from_utf8_lossy(attr.key.local_name().as_ref()).into_owned();
        let value = attr.unescape_value().map_err(|_| ())?.into_owned();
        attrs.push((key, value));
    }

    Ok(Element {
        namespace,
        local,
        attrs,
        children: Vec::new(),
        text: String::new(),
    })
}
