use crate::events::{AdoptedStyle, AdoptedStyleSheetData, AttributeChange, MutationData, RuleAdd};
use crate::mirror::{Mirror, StyleSheetMirror};
use crate::snapshot::{CSS_TEXT_ATTRIBUTE, is_stylesheet_link};
use core_types::StyleSheetId;
use dom::{Dom, NodeRef};
use std::collections::BTreeMap;

/// Stylesheet ids, pending `<link>` loads and adopted stylesheets.
#[derive(Debug, Default)]
pub struct StylesheetManager {
    style_mirror: StyleSheetMirror,
    tracked_links: Vec<NodeRef>,
}

impl StylesheetManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn style_mirror(&self) -> &StyleSheetMirror {
        &self.style_mirror
    }

    /// Fresh style id for re-addressing a remote frame's sheets.
    pub fn reserve_style_id(&mut self) -> StyleSheetId {
        self.style_mirror.reserve()
    }

    /// Wait for `link`'s sheet to load.
    pub fn track_link(&mut self, link: NodeRef) {
        if !self.tracked_links.contains(&link) {
            self.tracked_links.push(link);
        }
    }

    pub fn is_tracking(&self, link: NodeRef) -> bool {
        self.tracked_links.contains(&link)
    }

    /// A tracked link finished loading: describe the sheet as an attribute change.
    pub fn attach_link_element(
        &mut self,
        dom: &Dom,
        mirror: &Mirror,
        link: NodeRef,
    ) -> Option<MutationData> {
        let pos = self.tracked_links.iter().position(|l| *l == link)?;
        self.tracked_links.remove(pos);
        if !is_stylesheet_link(dom, link) {
            return None;
        }
        let id = mirror.get_id(link)?;
        let sheet = dom.style_sheet(dom.link_sheet(link)?)?;
        let attributes = BTreeMap::from([(CSS_TEXT_ATTRIBUTE.to_string(), Some(sheet.css_text()))]);
        Some(MutationData {
            attributes: vec![AttributeChange { id, attributes }],
            ..MutationData::default()
        })
    }

    /// Describe the adopted stylesheets of `root` (a document or shadow root). Only
    /// sheets seen for the first time carry their rules.
    pub fn adopt_style_sheets(
        &mut self,
        dom: &Dom,
        mirror: &Mirror,
        root: NodeRef,
    ) -> Option<AdoptedStyleSheetData> {
        let sheets = dom.adopted_style_sheets(root);
        if sheets.is_empty() {
            return None;
        }
        let id = mirror.get_id(dom.shadow_host(root).unwrap_or(root))?;
        let mut data = AdoptedStyleSheetData {
            id,
            style_ids: Vec::with_capacity(sheets.len()),
            styles: Vec::new(),
        };
        for sheet in sheets {
            let style_id = match self.style_mirror.get_id(*sheet) {
                Some(style_id) => style_id,
                None => {
                    let style_id = self.style_mirror.allocate(*sheet);
                    let rules = dom
                        .style_sheet(*sheet)
                        .map(|s| {
                            s.rules
                                .iter()
                                .enumerate()
                                .map(|(index, rule)| RuleAdd {
                                    rule: rule.clone(),
                                    index: Some(index as u32),
                                })
                                .collect()
                        })
                        .unwrap_or_default();
                    data.styles.push(AdoptedStyle { style_id, rules });
                    style_id
                }
            };
            data.style_ids.push(style_id);
        }
        Some(data)
    }

    pub fn reset(&mut self) {
        self.style_mirror.reset();
        self.tracked_links.clear();
    }
}
