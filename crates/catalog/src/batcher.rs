//! Re-paging a document stream into bounded columnar pages
//!
//! Consecutive events sharing a descriptor collapse into one
//! `event_page`; consecutive datums sharing a resource collapse into one
//! `datum_page`; every other kind passes through unchanged and flushes
//! whatever is pending. A kind change, a parent change, or a full buffer
//! always forces a page break, so input order is preserved exactly.
//!
//! Implemented as an explicit iterative state machine rather than
//! recursion: memory is bounded by the page size and stack depth is
//! constant regardless of input length.

use beamcat_core::{Datum, DatumPage, Document, Event, EventPage};

/// Buffer of same-kind, same-parent documents awaiting a flush
enum Pending {
    Empty,
    Events(Vec<Event>),
    Datums(Vec<Datum>),
}

impl Pending {
    fn flush(&mut self) -> Option<Document> {
        match std::mem::replace(self, Pending::Empty) {
            Pending::Empty => None,
            Pending::Events(events) => Some(Document::EventPage(EventPage::pack(&events))),
            Pending::Datums(datums) => Some(Document::DatumPage(DatumPage::pack(&datums))),
        }
    }
}

/// Iterator adapter that groups a document stream into bounded pages
pub struct DocumentBatcher<I> {
    input: I,
    page_size: usize,
    pending: Pending,
    /// Pass-through document waiting behind a flushed page
    queued: Option<Document>,
}

impl<I> DocumentBatcher<I>
where
    I: Iterator<Item = Document>,
{
    /// Batch `input` into pages of at most `page_size` rows
    pub fn new(input: I, page_size: usize) -> Self {
        DocumentBatcher {
            input,
            page_size: page_size.max(1),
            pending: Pending::Empty,
            queued: None,
        }
    }
}

impl<I> Iterator for DocumentBatcher<I>
where
    I: Iterator<Item = Document>,
{
    type Item = Document;

    fn next(&mut self) -> Option<Document> {
        if let Some(document) = self.queued.take() {
            return Some(document);
        }
        loop {
            let document = match self.input.next() {
                Some(d) => d,
                // End of stream: flush whatever is pending.
                None => return self.pending.flush(),
            };
            match document {
                Document::Event(event) => {
                    match &mut self.pending {
                        Pending::Events(buffer)
                            if buffer.len() < self.page_size
                                && buffer
                                    .first()
                                    .map(|e| e.descriptor == event.descriptor)
                                    .unwrap_or(false) =>
                        {
                            buffer.push(event);
                        }
                        _ => {
                            let flushed = self.pending.flush();
                            self.pending = Pending::Events(vec![event]);
                            if flushed.is_some() {
                                return flushed;
                            }
                        }
                    }
                }
                Document::Datum(datum) => {
                    match &mut self.pending {
                        Pending::Datums(buffer)
                            if buffer.len() < self.page_size
                                && buffer
                                    .first()
                                    .map(|d| d.resource == datum.resource)
                                    .unwrap_or(false) =>
                        {
                            buffer.push(datum);
                        }
                        _ => {
                            let flushed = self.pending.flush();
                            self.pending = Pending::Datums(vec![datum]);
                            if flushed.is_some() {
                                return flushed;
                            }
                        }
                    }
                }
                other => {
                    // Any non-event/non-datum kind flushes the pending
                    // page and passes through unchanged.
                    match self.pending.flush() {
                        Some(page) => {
                            self.queued = Some(other);
                            return Some(page);
                        }
                        None => return Some(other),
                    }
                }
            }
        }
    }
}
