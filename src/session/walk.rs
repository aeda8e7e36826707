//! Lazy subtree walks.
//!
//! Each walk issues its next request only when polled past the bindings it
//! already holds. A walk ends when the agent returns `endOfMibView`, an OID
//! outside the starting subtree, or (on SNMPv1) a `noSuchName` error. An
//! agent that returns a non-increasing OID ends the walk with
//! [`Error::NonIncreasingOid`].

use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use futures_core::Stream;

use crate::error::{Error, ErrorStatus, Result};
use crate::oid::Oid;
use crate::transport::Transport;
use crate::value::Value;
use crate::varbind::VarBind;
use crate::version::Version;

use super::Session;

/// Which request a walk uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WalkMode {
    /// GETBULK on v2c and v3, GETNEXT on v1.
    #[default]
    Auto,
    GetNext,
    /// Rejected on SNMPv1 sessions.
    GetBulk,
}

type PendingRequest = Pin<Box<dyn Future<Output = Result<Vec<VarBind>>> + Send>>;

/// Position within one subtree.
#[derive(Debug, Clone)]
struct Cursor {
    root: Oid,
    next: Oid,
    last: Option<Oid>,
}

impl Cursor {
    fn new(root: Oid) -> Self {
        Self {
            next: root.clone(),
            root,
            last: None,
        }
    }

    /// `Ok(None)` once the subtree is exhausted.
    fn accept(&mut self, vb: VarBind) -> Result<Option<VarBind>> {
        if matches!(vb.value, Value::EndOfMibView) || !vb.oid.is_descendant_of(&self.root) {
            return Ok(None);
        }
        if let Some(last) = &self.last
            && vb.oid <= *last
        {
            return Err(Error::NonIncreasingOid {
                previous: last.clone(),
                current: vb.oid,
            });
        }
        self.next = vb.oid.clone();
        self.last = Some(vb.oid.clone());
        Ok(Some(vb))
    }
}

/// SNMPv1 agents signal the end of the MIB with `noSuchName`.
fn v1_end_of_mib(version: Version, error: &Error) -> Option<u32> {
    match error {
        Error::Remote {
            status: ErrorStatus::NoSuchName,
            index,
            ..
        } if version == Version::V1 => Some(*index),
        _ => None,
    }
}

fn poll_request(
    slot: &mut Option<PendingRequest>,
    start: impl FnOnce() -> PendingRequest,
    cx: &mut Context<'_>,
) -> Poll<Result<Vec<VarBind>>> {
    let mut request = slot.take().unwrap_or_else(start);
    match request.as_mut().poll(cx) {
        Poll::Pending => {
            *slot = Some(request);
            Poll::Pending
        }
        Poll::Ready(result) => Poll::Ready(result),
    }
}

/// Walk using GETNEXT, one binding per request.
///
/// Created by [`Session::walk_next`] or [`Session::walk`].
pub struct Walk<T: Transport> {
    session: Session<T>,
    cursor: Cursor,
    remaining: Option<usize>,
    done: bool,
    pending: Option<PendingRequest>,
}

impl<T: Transport + 'static> Walk<T> {
    pub(crate) fn new(session: Session<T>, root: Oid, limit: Option<usize>) -> Self {
        Self {
            session,
            cursor: Cursor::new(root),
            remaining: limit,
            done: false,
            pending: None,
        }
    }

    pub async fn next(&mut self) -> Option<Result<VarBind>> {
        std::future::poll_fn(|cx| Pin::new(&mut *self).poll_next(cx)).await
    }

    /// Drain the walk; fails on the first error.
    pub async fn collect(mut self) -> Result<Vec<VarBind>> {
        let mut results = Vec::new();
        while let Some(vb) = self.next().await {
            results.push(vb?);
        }
        Ok(results)
    }

    fn start(session: &Session<T>, oid: &Oid) -> PendingRequest {
        let session = session.clone();
        let oid = oid.clone();
        Box::pin(async move { session.get_next(&[oid]).await })
    }
}

impl<T: Transport + 'static> Stream for Walk<T> {
    type Item = Result<VarBind>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if this.done || this.remaining == Some(0) {
            this.done = true;
            return Poll::Ready(None);
        }

        let start = || Self::start(&this.session, &this.cursor.next);
        let result = match poll_request(&mut this.pending, start, cx) {
            Poll::Pending => return Poll::Pending,
            Poll::Ready(result) => result,
        };

        let outcome = match result {
            Ok(varbinds) => match varbinds.into_iter().next() {
                Some(vb) => this.cursor.accept(vb).transpose(),
                None => None,
            },
            Err(e) if v1_end_of_mib(this.session.version(), &e).is_some() => None,
            Err(e) => Some(Err(e)),
        };
        match &outcome {
            Some(Ok(_)) => {
                if let Some(n) = &mut this.remaining {
                    *n -= 1;
                }
            }
            _ => this.done = true,
        }
        Poll::Ready(outcome)
    }
}

/// Walk using GETBULK, buffering `max_repetitions` bindings per request.
///
/// Created by [`Session::bulk_walk`] or [`Session::walk`].
pub struct BulkWalk<T: Transport> {
    session: Session<T>,
    cursor: Cursor,
    max_repetitions: u32,
    remaining: Option<usize>,
    done: bool,
    buffer: VecDeque<VarBind>,
    pending: Option<PendingRequest>,
}

impl<T: Transport + 'static> BulkWalk<T> {
    pub(crate) fn new(
        session: Session<T>,
        root: Oid,
        max_repetitions: u32,
        limit: Option<usize>,
    ) -> Self {
        Self {
            session,
            cursor: Cursor::new(root),
            max_repetitions,
            remaining: limit,
            done: false,
            buffer: VecDeque::new(),
            pending: None,
        }
    }

    pub async fn next(&mut self) -> Option<Result<VarBind>> {
        std::future::poll_fn(|cx| Pin::new(&mut *self).poll_next(cx)).await
    }

    pub async fn collect(mut self) -> Result<Vec<VarBind>> {
        let mut results = Vec::new();
        while let Some(vb) = self.next().await {
            results.push(vb?);
        }
        Ok(results)
    }

    fn start(session: &Session<T>, oid: &Oid, max_repetitions: u32) -> PendingRequest {
        let session = session.clone();
        let oid = oid.clone();
        Box::pin(async move { session.get_bulk(&[oid], 0, max_repetitions).await })
    }
}

impl<T: Transport + 'static> Stream for BulkWalk<T> {
    type Item = Result<VarBind>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        loop {
            if this.done || this.remaining == Some(0) {
                this.done = true;
                return Poll::Ready(None);
            }

            if let Some(vb) = this.buffer.pop_front() {
                let outcome = this.cursor.accept(vb).transpose();
                match &outcome {
                    Some(Ok(_)) => {
                        if let Some(n) = &mut this.remaining {
                            *n -= 1;
                        }
                    }
                    _ => {
                        this.done = true;
                        this.buffer.clear();
                    }
                }
                return Poll::Ready(outcome);
            }

            let start = || Self::start(&this.session, &this.cursor.next, this.max_repetitions);
            match poll_request(&mut this.pending, start, cx) {
                Poll::Pending => return Poll::Pending,
                Poll::Ready(Ok(varbinds)) if varbinds.is_empty() => {
                    this.done = true;
                    return Poll::Ready(None);
                }
                Poll::Ready(Ok(varbinds)) => this.buffer = varbinds.into(),
                Poll::Ready(Err(e)) => {
                    this.done = true;
                    return Poll::Ready(Some(Err(e)));
                }
            }
        }
    }
}

/// Walk chosen by [`Session::walk`].
pub enum WalkStream<T: Transport> {
    Next(Walk<T>),
    Bulk(BulkWalk<T>),
}

impl<T: Transport + 'static> WalkStream<T> {
    pub async fn next(&mut self) -> Option<Result<VarBind>> {
        match self {
            WalkStream::Next(walk) => walk.next().await,
            WalkStream::Bulk(walk) => walk.next().await,
        }
    }

    pub async fn collect(self) -> Result<Vec<VarBind>> {
        match self {
            WalkStream::Next(walk) => walk.collect().await,
            WalkStream::Bulk(walk) => walk.collect().await,
        }
    }
}

impl<T: Transport + 'static> Stream for WalkStream<T> {
    type Item = Result<VarBind>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        match self.get_mut() {
            WalkStream::Next(walk) => Pin::new(walk).poll_next(cx),
            WalkStream::Bulk(walk) => Pin::new(walk).poll_next(cx),
        }
    }
}

/// Walk table columns in lockstep with multi-binding GETNEXTs.
///
/// Each item holds one binding per column, in column order. The walk ends
/// as soon as any column leaves its subtree or reaches `endOfMibView` (on
/// SNMPv1, when the agent reports `noSuchName`), so every row lines up with
/// the requested columns. The result limit counts rows.
pub struct TableWalk<T: Transport> {
    session: Session<T>,
    columns: Vec<Cursor>,
    remaining: Option<usize>,
    done: bool,
    pending: Option<PendingRequest>,
}

impl<T: Transport + 'static> TableWalk<T> {
    pub(crate) fn new(session: Session<T>, columns: Vec<Oid>, limit: Option<usize>) -> Self {
        Self {
            session,
            columns: columns.into_iter().map(Cursor::new).collect(),
            remaining: limit,
            done: false,
            pending: None,
        }
    }

    pub async fn next(&mut self) -> Option<Result<Vec<VarBind>>> {
        std::future::poll_fn(|cx| Pin::new(&mut *self).poll_next(cx)).await
    }

    pub async fn collect(mut self) -> Result<Vec<Vec<VarBind>>> {
        let mut rows = Vec::new();
        while let Some(row) = self.next().await {
            rows.push(row?);
        }
        Ok(rows)
    }

    fn start(session: &Session<T>, columns: &[Cursor]) -> PendingRequest {
        let session = session.clone();
        let oids: Vec<Oid> = columns.iter().map(|c| c.next.clone()).collect();
        Box::pin(async move { session.get_next(&oids).await })
    }

    /// `Ok(None)` once any column is exhausted.
    fn advance(&mut self, varbinds: Vec<VarBind>) -> Result<Option<Vec<VarBind>>> {
        let mut row = Vec::with_capacity(self.columns.len());
        for (cursor, vb) in self.columns.iter_mut().zip(varbinds) {
            match cursor.accept(vb)? {
                Some(vb) => row.push(vb),
                None => return Ok(None),
            }
        }
        Ok(Some(row))
    }
}

impl<T: Transport + 'static> Stream for TableWalk<T> {
    type Item = Result<Vec<VarBind>>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if this.done || this.columns.is_empty() || this.remaining == Some(0) {
            this.done = true;
            return Poll::Ready(None);
        }

        let start = || Self::start(&this.session, &this.columns);
        let outcome = match poll_request(&mut this.pending, start, cx) {
            Poll::Pending => return Poll::Pending,
            Poll::Ready(Ok(varbinds)) => this.advance(varbinds).transpose(),
            Poll::Ready(Err(e)) if v1_end_of_mib(this.session.version(), &e).is_some() => None,
            Poll::Ready(Err(e)) => Some(Err(e)),
        };
        match &outcome {
            Some(Ok(_)) => {
                if let Some(n) = &mut this.remaining {
                    *n -= 1;
                }
            }
            _ => this.done = true,
        }
        Poll::Ready(outcome)
    }
}
