//! Index-based navigation over a profile's flat element list.
//!
//! Elements are addressed by their position in the (snapshot) element array.
//! Every operation is a pure function of the list and an index, so recursive
//! conversion never shares cursor state between siblings.

use crate::types::structure_definition::ElementDefinition;

#[derive(Debug, Clone, Copy)]
pub struct ElementNavigator<'a> {
    elements: &'a [ElementDefinition],
}

impl<'a> ElementNavigator<'a> {
    pub fn new(elements: &'a [ElementDefinition]) -> Self {
        Self { elements }
    }

    pub fn element(&self, index: usize) -> &'a ElementDefinition {
        &self.elements[index]
    }

    pub fn elements(&self) -> &'a [ElementDefinition] {
        self.elements
    }

    /// Is `candidate` inside the subtree (children and owned slices) of `index`?
    fn in_subtree(&self, index: usize, candidate: usize) -> bool {
        let owner = &self.elements[index];
        let el = &self.elements[candidate];
        if el.path.len() > owner.path.len()
            && el.path.starts_with(&owner.path)
            && el.path.as_bytes()[owner.path.len()] == b'.'
        {
            return true;
        }
        if el.path != owner.path {
            return false;
        }
        match (&owner.slice_name, &el.slice_name) {
            (None, Some(_)) => true,
            (Some(own), Some(other)) => other
                .strip_prefix(own.as_str())
                .is_some_and(|rest| rest.starts_with('/')),
            _ => false,
        }
    }

    /// Index one past the last element of the subtree of `index`
    fn subtree_end(&self, index: usize) -> usize {
        (index + 1..self.elements.len())
            .find(|&j| !self.in_subtree(index, j))
            .unwrap_or(self.elements.len())
    }

    /// Direct children, excluding slice entries of `index` and of the children
    pub fn children(&self, index: usize) -> Vec<usize> {
        let owner = &self.elements[index];
        let depth = owner.depth() + 1;
        let end = self.subtree_end(index);
        (index + 1..end)
            .take_while(|&j| self.elements[j].path != owner.path)
            .filter(|&j| {
                let el = &self.elements[j];
                el.depth() == depth && el.slice_name.is_none()
            })
            .collect()
    }

    pub fn has_children(&self, index: usize) -> bool {
        !self.children(index).is_empty()
    }

    /// Direct member slices of a slice intro.
    ///
    /// Re-slices (`a/b`) belong to the group introduced by slice `a`.
    pub fn member_slices(&self, index: usize) -> Vec<usize> {
        let owner = &self.elements[index];
        let end = self.subtree_end(index);
        (index + 1..end)
            .filter(|&j| {
                let el = &self.elements[j];
                if el.path != owner.path {
                    return false;
                }
                match (&owner.slice_name, &el.slice_name) {
                    (None, Some(name)) => !name.contains('/'),
                    (Some(own), Some(name)) => name
                        .strip_prefix(own.as_str())
                        .and_then(|rest| rest.strip_prefix('/'))
                        .is_some_and(|rest| !rest.contains('/')),
                    _ => false,
                }
            })
            .collect()
    }

    /// Direct child by element name; choice elements also match their typed form
    pub fn child_by_name(&self, index: usize, name: &str) -> Option<usize> {
        self.children(index).into_iter().find(|&j| {
            let element = &self.elements[j];
            let child = element.name();
            child == name
                || (element.is_choice()
                    && (name == child.trim_end_matches("[x]")
                        || crate::instance::matches_element_name(child, name)))
        })
    }

    /// First element with the given path that is not a slice entry
    pub fn find_path(&self, path: &str) -> Option<usize> {
        self.elements
            .iter()
            .position(|e| e.path == path && e.slice_name.is_none())
    }
}
