mod condvar;
mod mutex;
mod rwlock;
