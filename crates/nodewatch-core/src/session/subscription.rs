use crate::types::TxFilter;

/// What the node has been asked to push to this session.
///
/// Updated only after the node accepts the corresponding command, and
/// replayed verbatim after a reconnect.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Subscription {
    pub filter: Option<TxFilter>,
    pub blocks: bool,
    /// `Some(verbose)` while new-transaction notifications are enabled.
    pub new_transactions: Option<bool>,
}

impl Subscription {
    pub(crate) fn replace_filter(&mut self, filter: TxFilter) {
        self.filter = Some(filter);
    }

    pub(crate) fn extend_filter(&mut self, filter: &TxFilter) {
        match &mut self.filter {
            Some(existing) => existing.merge(filter),
            None => self.filter = Some(filter.clone()),
        }
    }

    pub fn is_empty(&self) -> bool {
        !self.blocks
            && self.new_transactions.is_none()
            && self.filter.as_ref().map_or(true, TxFilter::is_empty)
    }
}
