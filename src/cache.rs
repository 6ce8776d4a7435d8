use fibermesh_crdt::DocId;
use fnv::FnvHashMap;

/// Mapping from document id to the current materialized CRDT state (spec
/// §2.5). Mutated by local change, by applied remote changes, or by
/// initial construction; never by anything outside the engine.
#[derive(Default)]
pub struct DocumentCache<D> {
    docs: FnvHashMap<DocId, D>,
}

impl<D: Clone> DocumentCache<D> {
    pub fn get(&self, doc: &DocId) -> Option<D> {
        self.docs.get(doc).cloned()
    }

    pub fn set(&mut self, doc: DocId, value: D) {
        self.docs.insert(doc, value);
    }

    pub fn remove(&mut self, doc: &DocId) {
        self.docs.remove(doc);
    }

    pub fn contains(&self, doc: &DocId) -> bool {
        self.docs.contains_key(doc)
    }

    pub fn doc_ids(&self) -> Vec<DocId> {
        self.docs.keys().copied().collect()
    }
}
